//! Disk images for the three storage backends.
//!
//! | Backend | Storage object | Snapshot |
//! |---------|----------------|----------|
//! | Raw     | flat file      | hypervisor-internal reference |
//! | Qcow    | qcow2 file (optionally backed by a base) | hypervisor-internal reference |
//! | Lvm     | logical volume `/dev/<vg>/<lv>` | copy-on-write LV |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use localvol_shared::errors::{LocalvolError, LocalvolResult};

use super::constants::{lvm, qcow2};
use super::domain::Domain;
use super::driver::{DiskFormat, ImageBackend};
use super::snapshot::{DomainSnapshot, LvmSnapshot, Snapshot};
use super::tools::DiskTools;
use crate::util::ToolCommand;

/// A disk image owned by one volume.
#[derive(Debug, Clone)]
pub enum Image {
    Raw(FileImage),
    Qcow(FileImage),
    Lvm(LvmImage),
}

/// Image stored as a regular file. Shared by the raw and qcow2 variants.
#[derive(Debug, Clone)]
pub struct FileImage {
    path: PathBuf,
    tools: DiskTools,
}

/// Image stored as a logical volume.
#[derive(Debug, Clone)]
pub struct LvmImage {
    volume_group: String,
    name: String,
    path: PathBuf,
    tools: DiskTools,
}

impl Image {
    pub fn raw(path: impl Into<PathBuf>, tools: DiskTools) -> Self {
        Image::Raw(FileImage {
            path: path.into(),
            tools,
        })
    }

    pub fn qcow(path: impl Into<PathBuf>, tools: DiskTools) -> Self {
        Image::Qcow(FileImage {
            path: path.into(),
            tools,
        })
    }

    pub fn lvm(volume_group: &str, name: &str, tools: DiskTools) -> Self {
        Image::Lvm(LvmImage {
            volume_group: volume_group.to_string(),
            name: name.to_string(),
            path: lvm_path(volume_group, name),
            tools,
        })
    }

    pub fn backend(&self) -> ImageBackend {
        match self {
            Image::Raw(_) => ImageBackend::Raw,
            Image::Qcow(_) => ImageBackend::Qcow,
            Image::Lvm(_) => ImageBackend::Lvm,
        }
    }

    /// Filesystem path of the image file or block device.
    pub fn path(&self) -> &Path {
        match self {
            Image::Raw(f) | Image::Qcow(f) => &f.path,
            Image::Lvm(l) => &l.path,
        }
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    fn tools(&self) -> &DiskTools {
        match self {
            Image::Raw(f) | Image::Qcow(f) => &f.tools,
            Image::Lvm(l) => &l.tools,
        }
    }

    /// Allocate an empty image of `size` bytes.
    pub fn create_clean(&self, size: u64) -> LocalvolResult<()> {
        match self {
            Image::Raw(f) => f.create_clean(DiskFormat::Raw, None, size),
            Image::Qcow(f) => f.create_clean(
                DiskFormat::Qcow2,
                Some(format!("cluster_size={}", qcow2::CLUSTER_SIZE)),
                size,
            ),
            Image::Lvm(l) => l.create_clean(size),
        }
    }

    /// Build this image from the raw image at `base`, growing it to `size`.
    ///
    /// Fails with `ImageTooLarge` when `base` is larger than `size`.
    pub fn create_from_raw(&self, base: &Path, size: Option<u64>) -> LocalvolResult<()> {
        self.tools().assert_fits(base, size)?;
        match self {
            Image::Raw(f) => f.copy_from(base, size),
            Image::Qcow(f) => f.overlay_on(base, size),
            Image::Lvm(l) => l.fill_from(base, size),
        }
    }

    /// Grow the image to `size` bytes. Shrinking is not supported.
    pub fn resize(&self, size: u64) -> LocalvolResult<()> {
        match self {
            Image::Raw(f) | Image::Qcow(f) => f.resize(size),
            Image::Lvm(l) => l.resize(size),
        }
    }

    pub fn delete(&self) -> LocalvolResult<()> {
        match self {
            Image::Raw(f) | Image::Qcow(f) => f.delete(),
            Image::Lvm(l) => l.delete(),
        }
    }

    /// Describe a snapshot of this image. Nothing is created until
    /// [`Snapshot::create`] is called.
    pub fn make_snapshot(
        &self,
        domain: Arc<dyn Domain>,
        snapshot_name: &str,
        force_live_snapshot: bool,
    ) -> LocalvolResult<Snapshot> {
        Ok(match self {
            Image::Raw(f) => Snapshot::Raw(DomainSnapshot::new(
                domain,
                snapshot_name,
                f.path.clone(),
                f.tools.clone(),
            )),
            Image::Qcow(f) => Snapshot::Qcow(DomainSnapshot::new(
                domain,
                snapshot_name,
                f.path.clone(),
                f.tools.clone(),
            )),
            Image::Lvm(l) => {
                let size = l.tools.virtual_size(&l.path)?;
                Snapshot::Lvm(LvmSnapshot::new(
                    domain,
                    &l.volume_group,
                    snapshot_name,
                    size,
                    l.path.clone(),
                    force_live_snapshot,
                    l.tools.clone(),
                ))
            }
        })
    }
}

pub(crate) fn lvm_path(volume_group: &str, name: &str) -> PathBuf {
    Path::new(lvm::DEV_ROOT).join(volume_group).join(name)
}

fn bytes_arg(size: u64) -> String {
    format!("{}b", size)
}

impl FileImage {
    fn target(&self) -> String {
        self.path.display().to_string()
    }

    fn create_clean(
        &self,
        format: DiskFormat,
        options: Option<String>,
        size: u64,
    ) -> LocalvolResult<()> {
        let mut cmd = self
            .tools
            .qemu_img()
            .args(["create", "-f", format.as_str()]);
        if let Some(options) = options {
            cmd = cmd.arg("-o").arg(options);
        }
        self.tools.run(cmd.arg(self.target()).arg(bytes_arg(size)))?;
        Ok(())
    }

    fn copy_from(&self, base: &Path, size: Option<u64>) -> LocalvolResult<()> {
        self.tools.run(
            ToolCommand::new("cp")
                .arg(base.display().to_string())
                .arg(self.target()),
        )?;
        if let Some(size) = size {
            self.tools.extend(&self.path, size)?;
        }
        Ok(())
    }

    fn overlay_on(&self, base: &Path, size: Option<u64>) -> LocalvolResult<()> {
        self.tools.run(
            self.tools
                .qemu_img()
                .args(["create", "-f", DiskFormat::Qcow2.as_str(), "-o"])
                .arg(format!(
                    "cluster_size={},backing_file={}",
                    qcow2::CLUSTER_SIZE,
                    base.display()
                ))
                .arg(self.target()),
        )?;
        if let Some(size) = size {
            self.tools.extend(&self.path, size)?;
        }
        Ok(())
    }

    fn resize(&self, size: u64) -> LocalvolResult<()> {
        self.tools.run(
            self.tools
                .qemu_img()
                .arg("resize")
                .arg(self.target())
                .arg(bytes_arg(size))
                .as_root(),
        )?;
        Ok(())
    }

    fn delete(&self) -> LocalvolResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "Image file already absent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Error during image delete");
                Err(LocalvolError::Storage(format!(
                    "Failed to delete image {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }
    }
}

impl LvmImage {
    fn device(&self) -> String {
        self.path.display().to_string()
    }

    fn create_clean(&self, size: u64) -> LocalvolResult<()> {
        tracing::info!(lv = %self.name, vg = %self.volume_group, size, "Creating logical volume");
        self.tools.run(
            ToolCommand::new("lvcreate")
                .arg("-L")
                .arg(bytes_arg(size))
                .arg("-n")
                .arg(self.name.as_str())
                .arg(self.volume_group.as_str())
                .as_root(),
        )?;
        Ok(())
    }

    fn fill_from(&self, base: &Path, size: Option<u64>) -> LocalvolResult<()> {
        let size = match size {
            Some(size) => size,
            None => self.tools.virtual_size(base)?,
        };
        self.create_clean(size)?;

        let target = self.device();
        tracing::info!(base = %base.display(), lv = %self.name, "Converting base image into logical volume");
        self.tools.run(
            self.tools
                .qemu_img()
                .arg("convert")
                .arg(base.display().to_string())
                .args(["-O", DiskFormat::Raw.as_str()])
                .arg(target.as_str())
                .as_root(),
        )?;
        self.tools.run(
            ToolCommand::new("e2fsck")
                .arg("-fp")
                .arg(target.as_str())
                .as_root()
                .ignore_exit_code(),
        )?;
        self.tools.run(
            ToolCommand::new("resize2fs")
                .arg(target.as_str())
                .as_root()
                .ignore_exit_code(),
        )?;
        Ok(())
    }

    fn resize(&self, size: u64) -> LocalvolResult<()> {
        let current = self.tools.virtual_size(&self.path)?;
        if current == size {
            tracing::debug!(lv = %self.name, size, "Logical volume already at requested size");
            return Ok(());
        }
        self.tools.run(
            ToolCommand::new("lvresize")
                .args(["-f", "-L"])
                .arg(bytes_arg(size))
                .arg(self.device())
                .as_root(),
        )?;
        Ok(())
    }

    fn is_present(&self) -> bool {
        self.tools
            .run(ToolCommand::new("lvdisplay").arg(self.device()).as_root())
            .is_ok()
    }

    fn delete(&self) -> LocalvolResult<()> {
        let device = self.device();
        tracing::info!(device = %device, "Deleting logical volume");

        if !self.is_present() {
            tracing::debug!(device = %device, "Logical volume not present, nothing to delete");
            return Ok(());
        }

        let attrs = self.tools.run(
            ToolCommand::new("lvdisplay")
                .args(["--noheading", "-C", "-o", "Attr"])
                .arg(device.as_str())
                .as_root(),
        )?;
        if attrs.stdout.trim().contains(lvm::OPEN_ATTR_FLAGS) {
            tracing::debug!(device = %device, attrs = %attrs.stdout.trim(), "Detaching device-mapper mapping");
            self.tools.run(
                ToolCommand::new("dmsetup")
                    .args(["remove", "-c"])
                    .arg(device.as_str())
                    .as_root(),
            )?;
        }

        self.tools
            .run_retried(ToolCommand::new("lvremove").arg("-f").arg(device).as_root())?;
        Ok(())
    }
}
