use std::time::Duration;

use serde::Deserialize;

use crate::constants::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE, DEFAULT_RETRY_CAP};

/// Exponential backoff policy applied by a View after transient fetch
/// errors.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 means unlimited retries)
    #[serde(default = "default_attempts")]
    pub attempts: usize,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay(&self, retry: usize) -> Duration {
        let base = self.backoff_ms.max(1);
        let cap = self.max_backoff_ms.max(base);
        let shifted = base.checked_shl(retry.min(63) as u32).unwrap_or(cap);
        Duration::from_millis(shifted.min(cap))
    }

    /// Whether attempt number `retries` (1-based count of failures so
    /// far) exhausts the policy.
    pub fn exhausted(&self, retries: usize) -> bool {
        self.attempts != 0 && retries >= self.attempts
    }
}

fn default_attempts() -> usize {
    DEFAULT_RETRY_ATTEMPTS
}
fn default_backoff_ms() -> u64 {
    DEFAULT_RETRY_BASE.as_millis() as u64
}
fn default_max_backoff_ms() -> u64 {
    DEFAULT_RETRY_CAP.as_millis() as u64
}
