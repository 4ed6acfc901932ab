//! Process-wide tracing setup.

use std::sync::OnceLock;

use localvol_shared::errors::{LocalvolError, LocalvolResult};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::runtime::FilesystemLayout;
use crate::runtime::constants::filenames;

/// Keeps the non-blocking writer flushing for the life of the process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install a daily rolling file subscriber under `layout.logs_dir()`.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Only the first call in
/// a process installs anything; later calls return `Ok(())`.
pub fn init_logging_for(layout: &FilesystemLayout) -> LocalvolResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = layout.logs_dir();
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        LocalvolError::Storage(format!(
            "Failed to create logs directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let appender = tracing_appender::rolling::daily(&logs_dir, filenames::LOG_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init();

    match installed {
        Ok(()) => {
            let _ = LOG_GUARD.set(guard);
            tracing::debug!(logs_dir = %logs_dir.display(), "Logging initialized");
        }
        // Another subscriber owns the process (embedding application or test harness).
        Err(e) => {
            tracing::debug!(error = %e, "Global subscriber already set, keeping it");
        }
    }

    Ok(())
}
