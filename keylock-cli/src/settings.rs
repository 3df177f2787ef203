use std::path::Path;

use anyhow::{Context, anyhow};
use clap::Args;
use keylock_core::config::LockConfig;

// ─── Command-line Overrides ─────────────────────────────────────────────────

/// Flags that override the matching `LockConfig` fields.
#[derive(Args, Debug, Default)]
pub struct LockArgs {
    /// Lock time-to-live in milliseconds
    #[arg(long)]
    pub ttl_ms: Option<u64>,

    /// Retries after the first acquisition attempt
    #[arg(long)]
    pub retries: Option<u32>,

    /// Wait between acquisition attempts, in milliseconds
    #[arg(long)]
    pub retry_interval_ms: Option<u64>,

    /// Bound on each store round-trip while acquiring, in milliseconds
    #[arg(long)]
    pub attempt_timeout_ms: Option<u64>,

    /// Renewal period in milliseconds (defaults to a third of the TTL)
    #[arg(long)]
    pub renew_interval_ms: Option<u64>,
}

impl LockArgs {
    pub fn apply(&self, mut config: LockConfig) -> anyhow::Result<LockConfig> {
        if let Some(ttl) = self.ttl_ms {
            config.expiration_ms = ttl;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(interval) = self.retry_interval_ms {
            config.retry_interval_ms = interval;
        }
        if let Some(timeout) = self.attempt_timeout_ms {
            config.attempt_timeout_ms = timeout;
        }
        if let Some(interval) = self.renew_interval_ms {
            config.renew_interval_ms = Some(interval);
        }
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }
}

// ─── Config File ────────────────────────────────────────────────────────────

/// Defaults, overlaid with the JSON file at `path` if one is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<LockConfig> {
    let Some(path) = path else {
        return Ok(LockConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    let config: LockConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config file '{}'", path.display()))?;
    tracing::debug!(path = %path.display(), ?config, "Loaded lock config");
    Ok(config)
}
