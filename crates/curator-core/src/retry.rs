//! Retry with exponential backoff for transfer operations

use std::time::Duration;

use indicatif::ProgressBar;

/// Errors that can report whether retrying makes sense.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::error::StreamError {
    fn is_retryable(&self) -> bool {
        crate::error::StreamError::is_retryable(self)
    }
}

/// Exponential backoff: 2^attempt seconds (2s, 4s, 8s, ...)
pub const fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt))
}

/// Retry a fallible transfer with exponential backoff.
///
/// On retryable errors, logs the failure, updates the progress bar,
/// sleeps, and retries up to `max_retries`.
///
/// Returns `Ok(T)` on first success, or the final `Err` on exhaustion
/// or a non-retryable error.
pub fn retry_with_backoff<T, E: Retryable + std::fmt::Display>(
    label: &str,
    max_retries: u32,
    pb: &ProgressBar,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                pb.set_message(format!("retry {attempt}/{max_retries}..."));
                log::debug!("{label}: attempt {attempt}/{max_retries} failed: {e}, retrying...");
                std::thread::sleep(backoff_duration(attempt));
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}
