//! Retry logic with exponential backoff for transient provider errors.

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// A config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Notified before each retry.
pub trait RetryCallback {
    /// `attempt` is the 1-indexed attempt that just failed.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration);
}

/// Callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _: u32, _: u32, _: &ProviderError, _: Duration) {}
}

/// Result of a retried operation plus the number of attempts made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ProviderError>,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails terminally, or attempts run out.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: &dyn RetryCallback,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation() {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            return Attempted {
                result: Err(error),
                attempts: attempt,
            };
        }

        let delay = config.delay_for_attempt(attempt - 1);
        log::debug!("Attempt {attempt}/{max_attempts} failed: {error}; retrying in {delay:?}");
        callback.on_retry(attempt, max_attempts, &error, delay);
        thread::sleep(delay);
    }
}
