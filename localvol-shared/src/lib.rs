//! Types shared between the localvol control plane and compute hosts.

pub mod errors;
pub mod messages;

pub use errors::{LocalvolError, LocalvolResult};
pub use messages::{CastEnvelope, ComputeMessage, host_queue};
