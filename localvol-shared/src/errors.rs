//! Error taxonomy shared by the control plane and the disk drivers.

use thiserror::Error;

/// Result alias used across all localvol crates.
pub type LocalvolResult<T> = Result<T, LocalvolError>;

#[derive(Debug, Error)]
pub enum LocalvolError {
    /// Malformed request input (device path, missing size, bad literal).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid size literal: {0:?}")]
    InvalidSizeLiteral(String),

    /// Volume, snapshot, image record or instance is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Referenced snapshot image exists but is marked deleted.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A derived image would be smaller than the base it is built from.
    #[error("image too large: base image is {base_size} bytes, requested {requested} bytes")]
    ImageTooLarge { base_size: u64, requested: u64 },

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// An external backend tool could not be spawned or exited non-zero.
    #[error("{tool} failed (exit code {exit_code:?}): {stderr}")]
    BackendToolFailure {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LocalvolError {
    /// Failures that came out of a backend tool, used by the retry policy.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, LocalvolError::BackendToolFailure { .. })
    }
}
