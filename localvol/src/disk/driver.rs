//! Backend selection and the process-wide image driver.
//!
//! The backend is chosen once from [`LocalvolOptions`] at startup and the
//! resulting [`ImageDriver`] is passed to whoever needs it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use localvol_shared::errors::{LocalvolError, LocalvolResult};
use serde::{Deserialize, Serialize};

use super::constants::file;
use super::domain::Domain;
use super::image::{Image, lvm_path};
use super::tools::DiskTools;
use crate::runtime::options::LocalvolOptions;
use crate::util::CommandRunner;

/// Value of the `images_type` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagesType {
    Raw,
    Qcow,
    Lvm,
    /// Qcow when `use_cow_images` is set, raw otherwise.
    Legacy,
}

impl FromStr for ImagesType {
    type Err = LocalvolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(ImagesType::Raw),
            "qcow" => Ok(ImagesType::Qcow),
            "lvm" => Ok(ImagesType::Lvm),
            "legacy" => Ok(ImagesType::Legacy),
            other => Err(LocalvolError::Config(format!(
                "No image driver found for images_type {:?} (expected raw, qcow, lvm or legacy)",
                other
            ))),
        }
    }
}

/// Concrete storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    Raw,
    Qcow,
    Lvm,
}

/// Resolve the configured images type to a backend.
pub fn select_backend(images_type: ImagesType, use_cow_images: bool) -> ImageBackend {
    match images_type {
        ImagesType::Raw => ImageBackend::Raw,
        ImagesType::Qcow => ImageBackend::Qcow,
        ImagesType::Lvm => ImageBackend::Lvm,
        ImagesType::Legacy if use_cow_images => ImageBackend::Qcow,
        ImagesType::Legacy => ImageBackend::Raw,
    }
}

/// On-disk format handed to the hypervisor and to `qemu-img -f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Raw,
    Qcow2,
}

impl DiskFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::Qcow2 => "qcow2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    File,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    File,
    Dev,
}

/// Disk attributes consumed when building the hypervisor domain definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_type: DeviceType,
    pub source_type: SourceType,
    pub driver_type: DiskFormat,
    pub disk: PathBuf,
}

/// The single image driver active in this process.
#[derive(Debug, Clone)]
pub struct ImageDriver {
    backend: ImageBackend,
    tools: DiskTools,
    instances_path: PathBuf,
    volume_group: String,
}

impl ImageDriver {
    pub fn new(
        backend: ImageBackend,
        tools: DiskTools,
        instances_path: impl Into<PathBuf>,
        volume_group: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            tools,
            instances_path: instances_path.into(),
            volume_group: volume_group.into(),
        }
    }

    /// Build the driver selected by `options`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `images_type` is unknown, or if the LVM backend is
    /// selected without a volume group.
    pub fn from_options(
        options: &LocalvolOptions,
        runner: Arc<dyn CommandRunner>,
    ) -> LocalvolResult<Self> {
        let images_type: ImagesType = options.images_type.parse()?;
        let backend = select_backend(images_type, options.use_cow_images);

        if backend == ImageBackend::Lvm && options.lvm_volume_group.is_empty() {
            return Err(LocalvolError::Config(
                "images_type lvm requires lvm_volume_group to be set".into(),
            ));
        }

        tracing::info!(
            images_type = %options.images_type,
            backend = ?backend,
            "Selected image driver"
        );

        let tools = DiskTools::new(runner).with_qemu_img(options.qemu_img_binary.as_str());
        Ok(Self::new(
            backend,
            tools,
            options.instances_path.clone(),
            options.lvm_volume_group.clone(),
        ))
    }

    pub fn backend(&self) -> ImageBackend {
        self.backend
    }

    pub fn tools(&self) -> &DiskTools {
        &self.tools
    }

    pub fn disk_format(&self) -> DiskFormat {
        match self.backend {
            ImageBackend::Raw | ImageBackend::Lvm => DiskFormat::Raw,
            ImageBackend::Qcow => DiskFormat::Qcow2,
        }
    }

    fn file_path(
        &self,
        instance_name: &str,
        image_name: Option<&str>,
        suffix: Option<&str>,
    ) -> PathBuf {
        let mut file_name = image_name.unwrap_or(file::DEFAULT_IMAGE_NAME).to_string();
        if let Some(suffix) = suffix {
            file_name.push_str(suffix);
        }
        self.instances_path.join(instance_name).join(file_name)
    }

    fn lv_name(instance_name: &str, image_name: Option<&str>, suffix: Option<&str>) -> String {
        let mut lv_name = instance_name.to_string();
        for part in [image_name, suffix].into_iter().flatten() {
            lv_name.push('-');
            lv_name.push_str(part);
        }
        lv_name
    }

    fn wrap_path(&self, path: &Path) -> Image {
        match self.backend {
            ImageBackend::Raw => Image::raw(path, self.tools.clone()),
            ImageBackend::Qcow => Image::qcow(path, self.tools.clone()),
            ImageBackend::Lvm => {
                let lv = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Image::lvm(&self.volume_group, &lv, self.tools.clone())
            }
        }
    }

    /// Image owned by `instance_name`. Nothing is allocated.
    pub fn create_image(
        &self,
        instance_name: &str,
        image_name: Option<&str>,
        suffix: Option<&str>,
    ) -> Image {
        match self.backend {
            ImageBackend::Raw | ImageBackend::Qcow => {
                self.wrap_path(&self.file_path(instance_name, image_name, suffix))
            }
            ImageBackend::Lvm => Image::lvm(
                &self.volume_group,
                &Self::lv_name(instance_name, image_name, suffix),
                self.tools.clone(),
            ),
        }
    }

    /// Images backing the disks of `domain`.
    pub fn list_images(&self, domain: &dyn Domain) -> LocalvolResult<Vec<Image>> {
        let sources = domain.disk_sources()?;
        let paths: Vec<PathBuf> = sources
            .into_iter()
            .filter_map(|source| match self.backend {
                ImageBackend::Raw | ImageBackend::Qcow => source.file,
                ImageBackend::Lvm => source.dev,
            })
            .collect();

        tracing::info!(domain = %domain.name(), disks = ?paths, "Disks used by domain");
        Ok(paths.iter().map(|p| self.wrap_path(p)).collect())
    }

    pub fn disk_info(
        &self,
        instance_name: &str,
        image_name: Option<&str>,
        suffix: Option<&str>,
    ) -> DeviceDescriptor {
        match self.backend {
            ImageBackend::Raw | ImageBackend::Qcow => DeviceDescriptor {
                device_type: DeviceType::File,
                source_type: SourceType::File,
                driver_type: self.disk_format(),
                disk: self.file_path(instance_name, image_name, suffix),
            },
            ImageBackend::Lvm => DeviceDescriptor {
                device_type: DeviceType::Block,
                source_type: SourceType::Dev,
                driver_type: DiskFormat::Raw,
                disk: lvm_path(
                    &self.volume_group,
                    &Self::lv_name(instance_name, image_name, suffix),
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::domain::DiskSource;
    use crate::disk::domain::testing::FakeDomain;
    use crate::util::process::testing::ScriptedRunner;
    use rstest::rstest;

    fn driver(backend: ImageBackend) -> ImageDriver {
        ImageDriver::new(
            backend,
            DiskTools::new(Arc::new(ScriptedRunner::new())),
            "/var/lib/instances",
            "vg0",
        )
    }

    #[rstest]
    #[case(ImagesType::Raw, false, ImageBackend::Raw)]
    #[case(ImagesType::Raw, true, ImageBackend::Raw)]
    #[case(ImagesType::Qcow, false, ImageBackend::Qcow)]
    #[case(ImagesType::Lvm, true, ImageBackend::Lvm)]
    #[case(ImagesType::Legacy, true, ImageBackend::Qcow)]
    #[case(ImagesType::Legacy, false, ImageBackend::Raw)]
    fn test_select_backend(
        #[case] images_type: ImagesType,
        #[case] use_cow: bool,
        #[case] expected: ImageBackend,
    ) {
        assert_eq!(select_backend(images_type, use_cow), expected);
    }

    #[test]
    fn test_unknown_images_type_fails_startup() {
        let options = LocalvolOptions {
            images_type: "zfs".to_string(),
            ..Default::default()
        };
        let err = ImageDriver::from_options(&options, Arc::new(ScriptedRunner::new()))
            .unwrap_err();
        assert!(matches!(err, LocalvolError::Config(_)));
    }

    #[test]
    fn test_lvm_requires_volume_group() {
        let options = LocalvolOptions {
            images_type: "lvm".to_string(),
            lvm_volume_group: String::new(),
            ..Default::default()
        };
        assert!(ImageDriver::from_options(&options, Arc::new(ScriptedRunner::new())).is_err());
    }

    #[test]
    fn test_legacy_with_cow_flag_builds_qcow_driver() {
        let options = LocalvolOptions {
            images_type: "legacy".to_string(),
            use_cow_images: true,
            ..Default::default()
        };
        let driver =
            ImageDriver::from_options(&options, Arc::new(ScriptedRunner::new())).unwrap();
        assert_eq!(driver.backend(), ImageBackend::Qcow);
        assert_eq!(driver.disk_format(), DiskFormat::Qcow2);
    }

    #[test]
    fn test_file_image_paths() {
        let driver = driver(ImageBackend::Raw);
        let image = driver.create_image("instance-1", Some("disk.local"), Some(".part"));
        assert_eq!(
            image.path(),
            Path::new("/var/lib/instances/instance-1/disk.local.part")
        );
        assert_eq!(image.backend(), ImageBackend::Raw);

        let default = driver.create_image("instance-1", None, None);
        assert_eq!(default.path(), Path::new("/var/lib/instances/instance-1/disk"));
    }

    #[test]
    fn test_lvm_image_names() {
        let driver = driver(ImageBackend::Lvm);
        let image = driver.create_image("instance-1", Some("disk"), Some("swap"));
        assert_eq!(image.path(), Path::new("/dev/vg0/instance-1-disk-swap"));
        assert_eq!(
            driver.create_image("instance-1", None, None).path(),
            Path::new("/dev/vg0/instance-1")
        );
    }

    #[test]
    fn test_disk_info_descriptors() {
        let raw = driver(ImageBackend::Raw).disk_info("i", Some("disk"), None);
        assert_eq!(raw.device_type, DeviceType::File);
        assert_eq!(raw.source_type, SourceType::File);
        assert_eq!(raw.driver_type, DiskFormat::Raw);
        assert_eq!(raw.disk, PathBuf::from("/var/lib/instances/i/disk"));

        let qcow = driver(ImageBackend::Qcow).disk_info("i", Some("disk"), None);
        assert_eq!(qcow.driver_type, DiskFormat::Qcow2);

        let lvm = driver(ImageBackend::Lvm).disk_info("i", Some("disk"), None);
        assert_eq!(
            serde_json::to_value(&lvm).unwrap(),
            serde_json::json!({
                "device_type": "block",
                "source_type": "dev",
                "driver_type": "raw",
                "disk": "/dev/vg0/i-disk"
            })
        );
    }

    #[test]
    fn test_list_images_wraps_matching_sources() {
        let mut domain = FakeDomain::new(true);
        domain.sources = vec![
            DiskSource::file("/var/lib/instances/i/disk"),
            DiskSource::dev("/dev/vg0/i-disk"),
            DiskSource::default(),
        ];

        let files = driver(ImageBackend::Qcow).list_images(&domain).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].backend(), ImageBackend::Qcow);
        assert_eq!(files[0].path(), Path::new("/var/lib/instances/i/disk"));

        let lvs = driver(ImageBackend::Lvm).list_images(&domain).unwrap();
        assert_eq!(lvs.len(), 1);
        assert_eq!(lvs[0].path(), Path::new("/dev/vg0/i-disk"));
    }
}
