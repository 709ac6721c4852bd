//! Bounded exponential backoff

use core_types::Duration;
use serde::{Deserialize, Serialize};

/// Retry schedule for transient failures
///
/// The wait before attempt `n + 1` is `base * 2^(n - 1)`, capped at `max`.
/// After `max_retries` failed attempts the record is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            max_backoff,
        }
    }

    /// Backoff to wait after the `failures`-th consecutive failure
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63);
        self.base_backoff
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff)
    }

    /// Returns true once `failures` attempts have been spent
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(1000), Duration::from_millis(60_000))
    }
}
