use std::time::Duration;

use serde::Deserialize;

/// Guard against publish storms from a single View: a minimum interval
/// between updates plus random jitter to de-synchronize a fleet.
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct RateLimitConfig {
    /// Minimum delay between two publications of the same View
    /// (unit: milliseconds, 0 disables the guard)
    #[serde(default)]
    pub min_delay_ms: u64,

    /// Upper bound on the random jitter added on top of the minimum
    /// delay (unit: milliseconds)
    #[serde(default)]
    pub random_backoff_ms: u64,
}

impl RateLimitConfig {
    pub fn enabled(&self) -> bool {
        self.min_delay_ms > 0
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn random_backoff(&self) -> Duration {
        Duration::from_millis(self.random_backoff_ms)
    }
}
