//! Point-in-time snapshots of disk images.
//!
//! A [`Snapshot`] only describes what to capture. [`Snapshot::create`] acquires
//! it and returns an [`ActiveSnapshot`], which must be released exactly once:
//! explicitly via [`ActiveSnapshot::release`], or on drop for paths that never
//! get that far.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use localvol_shared::errors::{LocalvolError, LocalvolResult};

use super::constants::lvm;
use super::domain::Domain;
use super::driver::DiskFormat;
use super::image::lvm_path;
use super::tools::DiskTools;
use crate::util::ToolCommand;

pub enum Snapshot {
    Raw(DomainSnapshot),
    Qcow(DomainSnapshot),
    Lvm(LvmSnapshot),
}

/// Snapshot kept inside the hypervisor and read back with `qemu-img -s`.
pub struct DomainSnapshot {
    domain: Arc<dyn Domain>,
    name: String,
    source: PathBuf,
    tools: DiskTools,
}

/// Copy-on-write logical volume taken against a source LV.
pub struct LvmSnapshot {
    domain: Arc<dyn Domain>,
    name: String,
    path: PathBuf,
    size: u64,
    source: PathBuf,
    force_live_snapshot: bool,
    tools: DiskTools,
}

impl DomainSnapshot {
    pub(crate) fn new(
        domain: Arc<dyn Domain>,
        name: &str,
        source: PathBuf,
        tools: DiskTools,
    ) -> Self {
        Self {
            domain,
            name: name.to_string(),
            source,
            tools,
        }
    }

    fn create(&self) -> LocalvolResult<()> {
        self.domain.create_snapshot(&self.name)
    }

    fn convert_to_raw(&self, format: DiskFormat, destination: &Path) -> LocalvolResult<()> {
        self.tools.run(
            self.tools
                .qemu_img()
                .args(["convert", "-f", format.as_str(), "-O", DiskFormat::Raw.as_str()])
                .arg("-s")
                .arg(self.name.as_str())
                .arg(self.source.display().to_string())
                .arg(destination.display().to_string())
                .as_root(),
        )?;
        Ok(())
    }

    fn delete(&self) -> LocalvolResult<()> {
        self.domain.delete_snapshot(&self.name)
    }
}

impl LvmSnapshot {
    pub(crate) fn new(
        domain: Arc<dyn Domain>,
        volume_group: &str,
        name: &str,
        size: u64,
        source: PathBuf,
        force_live_snapshot: bool,
        tools: DiskTools,
    ) -> Self {
        Self {
            domain,
            name: name.to_string(),
            path: lvm_path(volume_group, name),
            size,
            source,
            force_live_snapshot,
            tools,
        }
    }

    /// Size of the copy-on-write area in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create(&self) -> LocalvolResult<()> {
        if !self.force_live_snapshot && self.domain.is_active()? {
            return Err(LocalvolError::PreconditionFailed(format!(
                "domain {} must be suspended before LVM snapshot",
                self.domain.name()
            )));
        }
        self.tools.run(
            ToolCommand::new("lvcreate")
                .arg(format!("-L{}b", self.size))
                .args(["-s", "-n"])
                .arg(self.name.as_str())
                .arg(self.source.display().to_string())
                .as_root(),
        )?;
        Ok(())
    }

    fn convert_to_raw(&self, destination: &Path) -> LocalvolResult<()> {
        self.tools.run(
            ToolCommand::new("dd")
                .arg(format!("if={}", self.path.display()))
                .arg(format!("of={}", destination.display()))
                .arg(format!("bs={}", lvm::DD_BLOCK_SIZE))
                .as_root(),
        )?;
        Ok(())
    }

    fn delete(&self) -> LocalvolResult<()> {
        self.tools.run(
            ToolCommand::new("lvremove")
                .arg("-f")
                .arg(self.path.display().to_string())
                .as_root(),
        )?;
        Ok(())
    }
}

impl Snapshot {
    pub fn name(&self) -> &str {
        match self {
            Snapshot::Raw(s) | Snapshot::Qcow(s) => &s.name,
            Snapshot::Lvm(s) => &s.name,
        }
    }

    /// Acquire the snapshot.
    pub fn create(self) -> LocalvolResult<ActiveSnapshot> {
        match &self {
            Snapshot::Raw(s) | Snapshot::Qcow(s) => s.create()?,
            Snapshot::Lvm(s) => s.create()?,
        }
        tracing::debug!(snapshot = %self.name(), "Snapshot created");
        Ok(ActiveSnapshot { inner: Some(self) })
    }

    /// Create the snapshot, write it to `destination` as a raw image and
    /// release it, whatever the conversion outcome.
    ///
    /// A release failure after a failed conversion is logged and the conversion
    /// error is returned. After a successful conversion it is returned as is.
    pub fn export_raw(self, destination: &Path) -> LocalvolResult<()> {
        let active = self.create()?;
        let converted = active.convert_to_raw(destination);
        let released = active.release();

        match (converted, released) {
            (Ok(()), released) => released,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                tracing::warn!(error = %release_err, "Failed to release snapshot after conversion failure");
                Err(e)
            }
        }
    }

    fn convert_to_raw(&self, destination: &Path) -> LocalvolResult<()> {
        match self {
            Snapshot::Raw(s) => s.convert_to_raw(DiskFormat::Raw, destination),
            Snapshot::Qcow(s) => s.convert_to_raw(DiskFormat::Qcow2, destination),
            Snapshot::Lvm(s) => s.convert_to_raw(destination),
        }
    }

    fn delete(&self) -> LocalvolResult<()> {
        match self {
            Snapshot::Raw(s) | Snapshot::Qcow(s) => s.delete(),
            Snapshot::Lvm(s) => s.delete(),
        }
    }
}

/// An acquired snapshot. Released on drop if not released explicitly.
pub struct ActiveSnapshot {
    inner: Option<Snapshot>,
}

impl ActiveSnapshot {
    pub fn name(&self) -> &str {
        self.inner.as_ref().map(Snapshot::name).unwrap_or_default()
    }

    /// Write the snapshot contents to `destination` as a flat raw image.
    pub fn convert_to_raw(&self, destination: &Path) -> LocalvolResult<()> {
        match &self.inner {
            Some(snapshot) => snapshot.convert_to_raw(destination),
            None => Err(LocalvolError::InvalidState("snapshot already released".into())),
        }
    }

    /// Release the snapshot.
    pub fn release(mut self) -> LocalvolResult<()> {
        self.do_release()
    }

    fn do_release(&mut self) -> LocalvolResult<()> {
        match self.inner.take() {
            Some(snapshot) => {
                snapshot.delete()?;
                tracing::debug!(snapshot = %snapshot.name(), "Snapshot released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for ActiveSnapshot {
    fn drop(&mut self) {
        if self.inner.is_none() {
            return;
        }
        if let Err(e) = self.do_release() {
            tracing::warn!(error = %e, "Failed to release snapshot on drop");
        }
    }
}
