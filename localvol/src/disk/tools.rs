//! Tool plumbing shared by every image and snapshot variant.

use std::path::Path;
use std::sync::Arc;

use localvol_shared::errors::{LocalvolError, LocalvolResult};
use serde::Deserialize;

use crate::util::{CommandRunner, RetryPolicy, ToolCommand, ToolOutput};

/// Subset of `qemu-img info --output=json`.
#[derive(Debug, Deserialize)]
struct QemuImgInfo {
    #[serde(rename = "virtual-size")]
    virtual_size: u64,
}

/// Runner, retry policy and binary names handed to every image.
#[derive(Clone)]
pub struct DiskTools {
    runner: Arc<dyn CommandRunner>,
    retry: RetryPolicy,
    qemu_img: String,
}

impl std::fmt::Debug for DiskTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTools")
            .field("qemu_img", &self.qemu_img)
            .field("max_attempts", &self.retry.max_attempts)
            .finish()
    }
}

impl DiskTools {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            retry: RetryPolicy::lvm(),
            qemu_img: "qemu-img".to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_qemu_img(mut self, binary: impl Into<String>) -> Self {
        self.qemu_img = binary.into();
        self
    }

    pub(crate) fn run(&self, command: ToolCommand) -> LocalvolResult<ToolOutput> {
        self.runner.execute(&command)
    }

    /// Run under the retry policy. Only LVM removal uses this; every other
    /// tool runs once.
    pub(crate) fn run_retried(&self, command: ToolCommand) -> LocalvolResult<ToolOutput> {
        self.retry.run(|| self.runner.execute(&command))
    }

    pub(crate) fn qemu_img(&self) -> ToolCommand {
        ToolCommand::new(self.qemu_img.as_str())
    }

    /// Size of the guest-visible disk stored at `path`, in bytes.
    pub fn virtual_size(&self, path: &Path) -> LocalvolResult<u64> {
        let output = self.run(
            self.qemu_img()
                .args(["info", "--output=json"])
                .arg(path.display().to_string())
                .as_root(),
        )?;

        let info: QemuImgInfo = serde_json::from_str(&output.stdout).map_err(|e| {
            LocalvolError::Storage(format!(
                "Failed to parse `qemu-img info` output for {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(info.virtual_size)
    }

    /// Fail with `ImageTooLarge` if `base` does not fit into `size` bytes.
    pub(crate) fn assert_fits(&self, base: &Path, size: Option<u64>) -> LocalvolResult<()> {
        let Some(size) = size else {
            return Ok(());
        };

        let base_size = self.virtual_size(base)?;
        tracing::debug!(base = %base.display(), base_size, allowed_size = size, "Checking base image size");

        if base_size > size {
            tracing::info!(
                base = %base.display(),
                base_size,
                allowed_size = size,
                "Base image exceeds requested size"
            );
            return Err(LocalvolError::ImageTooLarge {
                base_size,
                requested: size,
            });
        }
        Ok(())
    }

    /// Grow a file-backed image and its filesystem to `size` bytes.
    ///
    /// No-op if the image is already at least that large.
    pub(crate) fn extend(&self, path: &Path, size: u64) -> LocalvolResult<()> {
        let current = self.virtual_size(path)?;
        if current >= size {
            return Ok(());
        }

        let target = path.display().to_string();
        self.run(
            self.qemu_img()
                .arg("resize")
                .arg(target.as_str())
                .arg(size.to_string()),
        )?;
        // Filesystem repair and growth are best effort: the image may not
        // contain a bare ext filesystem at all.
        self.run(
            ToolCommand::new("e2fsck")
                .arg("-fp")
                .arg(target.as_str())
                .ignore_exit_code(),
        )?;
        self.run(
            ToolCommand::new("resize2fs")
                .arg(target.as_str())
                .ignore_exit_code(),
        )?;
        Ok(())
    }
}
