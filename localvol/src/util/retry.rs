//! Bounded retry with a pure backoff function.

use std::time::Duration;

use localvol_shared::errors::LocalvolResult;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay to wait after the given failed attempt (1-based).
    pub backoff: fn(u32) -> Duration,
}

/// `attempt²` seconds.
pub fn quadratic_backoff(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt) * u64::from(attempt))
}

fn no_backoff(_attempt: u32) -> Duration {
    Duration::ZERO
}

impl RetryPolicy {
    /// Policy used for LVM removal: 3 attempts, 1s then 4s between them.
    pub const fn lvm() -> Self {
        Self {
            max_attempts: 3,
            backoff: quadratic_backoff,
        }
    }

    /// Same attempt budget without sleeping.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: no_backoff,
        }
    }

    /// Run `op` until it succeeds or attempts are exhausted, sleeping the
    /// calling thread between attempts. Only backend tool failures are
    /// retried; any other error and the last tool failure are returned as is.
    pub fn run<T>(&self, op: impl FnMut() -> LocalvolResult<T>) -> LocalvolResult<T> {
        self.run_with_sleep(op, std::thread::sleep)
    }

    pub fn run_with_sleep<T>(
        &self,
        mut op: impl FnMut() -> LocalvolResult<T>,
        mut sleep: impl FnMut(Duration),
    ) -> LocalvolResult<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_tool_failure() || attempt >= self.max_attempts.max(1) => {
                    return Err(e);
                }
                Err(e) => {
                    let delay = (self.backoff)(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Operation failed, retrying"
                    );
                    sleep(delay);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::lvm()
    }
}
