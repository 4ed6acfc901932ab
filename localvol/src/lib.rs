//! localvol: host-local block volumes for virtual machine instances.
//!
//! The control plane side is [`volume::VolumeOrchestrator`]: it validates
//! requests, enforces quota, persists each [`volume::Volume`] in SQLite and
//! casts work to the compute host owning the instance. On compute hosts,
//! [`disk::ImageDriver`] creates, resizes, snapshots and deletes the disk
//! images with `qemu-img` and the LVM tools.

pub mod db;
pub mod disk;
mod logging;
pub mod runtime;
pub mod util;
pub mod volume;

pub use logging::init_logging_for;
pub use runtime::{LocalvolOptions, LocalvolRuntime, RuntimeServices};

pub use localvol_shared::errors::{LocalvolError, LocalvolResult};
pub use localvol_shared::messages::{CastEnvelope, ComputeMessage};
