//! Disk image drivers run on the host owning an instance.
//!
//! One backend (raw file, copy-on-write qcow2, or LVM logical volume) is
//! selected per process by [`ImageDriver::from_options`]. Images and snapshots
//! are closed enums over those backends.

pub mod constants;
mod domain;
mod driver;
mod image;
mod pool;
mod snapshot;
mod tools;

pub use domain::{DiskSource, Domain};
pub use driver::{
    DeviceDescriptor, DeviceType, DiskFormat, ImageBackend, ImageDriver, ImagesType, SourceType,
    select_backend,
};
pub use image::{FileImage, Image, LvmImage};
pub use pool::ImageWorkerPool;
pub use snapshot::{ActiveSnapshot, DomainSnapshot, LvmSnapshot, Snapshot};
pub use tools::DiskTools;
