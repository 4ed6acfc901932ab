//! Process-level configuration, filesystem layout and bootstrap.

pub mod constants;
mod core;
pub mod layout;
pub mod options;

pub use self::core::{LocalvolRuntime, RuntimeServices};
pub use layout::FilesystemLayout;
pub use options::{LocalvolOptions, QuotaLimits};
