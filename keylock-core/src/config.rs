use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::FixedInterval;

/// Tunables for acquiring and holding a lock. Durations are in milliseconds so
/// the struct round-trips through JSON config files unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// TTL the store attaches to the key.
    pub expiration_ms: u64,
    /// Wait between acquisition attempts.
    pub retry_interval_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Bound on each acquisition round-trip.
    pub attempt_timeout_ms: u64,
    /// Renewal period; `None` derives a third of the expiration.
    pub renew_interval_ms: Option<u64>,
    /// Bound on each renewal round-trip.
    pub renew_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            expiration_ms: 30_000,
            retry_interval_ms: 200,
            max_retries: 10,
            attempt_timeout_ms: 1_000,
            renew_interval_ms: None,
            renew_timeout_ms: 1_000,
        }
    }
}

impl LockConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_millis(self.expiration_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(
            self.renew_interval_ms
                .unwrap_or(self.expiration_ms / 3)
                .max(1),
        )
    }

    pub fn renew_timeout(&self) -> Duration {
        Duration::from_millis(self.renew_timeout_ms)
    }

    /// The reference retry policy built from this config.
    pub fn fixed_retry(&self) -> FixedInterval {
        FixedInterval::new(Duration::from_millis(self.retry_interval_ms), self.max_retries)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.expiration_ms == 0 {
            return Err("expiration_ms must be greater than 0".to_string());
        }
        if self.attempt_timeout_ms == 0 {
            return Err("attempt_timeout_ms must be greater than 0".to_string());
        }
        if self.renew_timeout_ms == 0 {
            return Err("renew_timeout_ms must be greater than 0".to_string());
        }
        if self.renew_interval() >= self.expiration() {
            return Err(format!(
                "renew interval ({}ms) must be shorter than expiration ({}ms)",
                self.renew_interval().as_millis(),
                self.expiration_ms
            ));
        }
        Ok(())
    }
}
