//! Hypervisor domain seen by the disk drivers.

use std::path::PathBuf;

use localvol_shared::errors::LocalvolResult;

/// One `<disk><source .../></disk>` entry of a domain definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskSource {
    /// `file` attribute, set for file-backed disks.
    pub file: Option<PathBuf>,
    /// `dev` attribute, set for block-backed disks.
    pub dev: Option<PathBuf>,
}

impl DiskSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            dev: None,
        }
    }

    pub fn dev(path: impl Into<PathBuf>) -> Self {
        Self {
            file: None,
            dev: Some(path.into()),
        }
    }
}

/// A running or paused virtual machine as exposed by the hypervisor binding.
pub trait Domain: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the domain is currently running.
    fn is_active(&self) -> LocalvolResult<bool>;

    /// Backing sources of every disk device, in definition order.
    fn disk_sources(&self) -> LocalvolResult<Vec<DiskSource>>;

    /// Record a named internal point-in-time snapshot.
    fn create_snapshot(&self, name: &str) -> LocalvolResult<()>;

    /// Release a snapshot recorded by [`Domain::create_snapshot`].
    fn delete_snapshot(&self, name: &str) -> LocalvolResult<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use localvol_shared::errors::LocalvolError;
    use parking_lot::Mutex;

    /// In-memory domain recording snapshot calls.
    pub(crate) struct FakeDomain {
        pub(crate) name: String,
        pub(crate) active: bool,
        pub(crate) sources: Vec<DiskSource>,
        pub(crate) events: Mutex<Vec<String>>,
        pub(crate) fail_delete: bool,
    }

    impl FakeDomain {
        pub(crate) fn new(active: bool) -> Self {
            Self {
                name: "instance-00000001".to_string(),
                active,
                sources: Vec::new(),
                events: Mutex::new(Vec::new()),
                fail_delete: false,
            }
        }

        pub(crate) fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl Domain for FakeDomain {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_active(&self) -> LocalvolResult<bool> {
            Ok(self.active)
        }

        fn disk_sources(&self) -> LocalvolResult<Vec<DiskSource>> {
            Ok(self.sources.clone())
        }

        fn create_snapshot(&self, name: &str) -> LocalvolResult<()> {
            self.events.lock().push(format!("create {}", name));
            Ok(())
        }

        fn delete_snapshot(&self, name: &str) -> LocalvolResult<()> {
            self.events.lock().push(format!("delete {}", name));
            if self.fail_delete {
                return Err(LocalvolError::Internal("snapshot delete refused".into()));
            }
            Ok(())
        }
    }
}
