//! Configuration for a localvol process.

use std::path::{Path, PathBuf};

use localvol_shared::errors::{LocalvolError, LocalvolResult};
use serde::{Deserialize, Serialize};

use super::constants::{defaults, envs};

/// Options used when building a localvol runtime.
///
/// Built once at startup and passed explicitly to every component that needs
/// it. Unknown JSON keys are rejected so typos surface at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalvolOptions {
    /// Root directory for the database and log files.
    pub home_dir: PathBuf,
    /// One of `raw`, `qcow`, `lvm`, `legacy`. Parsed when the driver is built.
    pub images_type: String,
    /// With `legacy`, selects qcow2 over raw.
    pub use_cow_images: bool,
    /// Volume group holding logical volumes. Required for `lvm`.
    pub lvm_volume_group: String,
    /// Directory holding one sub-directory per instance for file images.
    pub instances_path: PathBuf,
    /// Topic prefix of per-host dispatch queues.
    pub compute_topic: String,
    /// Command prefixed to privileged tool invocations. Empty runs them directly.
    pub root_helper: String,
    pub qemu_img_binary: String,
    /// Upper bound on image operations running at once.
    pub max_concurrent_operations: usize,
    pub quota: QuotaLimits,
}

/// Per-project volume limits. `None` means unlimited.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaLimits {
    pub volumes: Option<u64>,
    pub gigabytes: Option<u64>,
}

impl Default for LocalvolOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            images_type: defaults::IMAGES_TYPE.to_string(),
            use_cow_images: true,
            lvm_volume_group: String::new(),
            instances_path: PathBuf::from(defaults::INSTANCES_PATH),
            compute_topic: defaults::COMPUTE_TOPIC.to_string(),
            root_helper: defaults::ROOT_HELPER.to_string(),
            qemu_img_binary: defaults::QEMU_IMG.to_string(),
            max_concurrent_operations: defaults::MAX_CONCURRENT_OPERATIONS,
            quota: QuotaLimits::default(),
        }
    }
}

fn default_home_dir() -> PathBuf {
    if let Ok(home) = std::env::var(envs::LOCALVOL_HOME) {
        return PathBuf::from(home);
    }
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(defaults::HOME_DIR_NAME);
    path
}

impl LocalvolOptions {
    /// Load options from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> LocalvolResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LocalvolError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
            .map_err(|e| LocalvolError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(raw: &str) -> LocalvolResult<Self> {
        serde_json::from_str(raw).map_err(|e| LocalvolError::Config(e.to_string()))
    }

    /// Root helper as an optional prefix for the command runner.
    pub fn root_helper(&self) -> Option<String> {
        let helper = self.root_helper.trim();
        (!helper.is_empty()).then(|| helper.to_string())
    }

    /// Check constraints that do not depend on the backend.
    pub fn validate(&self) -> LocalvolResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(LocalvolError::Config(format!(
                "home_dir must be absolute path, got: {}",
                self.home_dir.display()
            )));
        }
        if self.compute_topic.is_empty() {
            return Err(LocalvolError::Config("compute_topic must not be empty".into()));
        }
        if self.max_concurrent_operations == 0 {
            return Err(LocalvolError::Config(
                "max_concurrent_operations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
