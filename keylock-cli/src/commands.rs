use anyhow::{Context, bail};
use keylock_core::config::LockConfig;
use keylock_core::{LockClient, LockError};
use serde::Serialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

// ─── Exit Codes ─────────────────────────────────────────────────────────────

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
/// Someone else holds the lock.
const EXIT_BUSY: u8 = 2;
/// The token no longer owns the lock.
const EXIT_NOT_HELD: u8 = 3;

pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<LockError>().map(LockError::root_cause) {
        Some(LockError::Contested) => EXIT_BUSY,
        Some(LockError::NotHeld) => EXIT_NOT_HELD,
        _ => EXIT_FAILURE,
    }
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct LockResponse<'a> {
    pub key: &'a str,
    pub token: &'a str,
    pub expiration_ms: u64,
}

#[derive(Serialize)]
pub struct StatusResponse<'a> {
    pub key: &'a str,
    pub status: &'static str,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ─── Storage Backend Selection ──────────────────────────────────────────────

pub async fn create_client(storage: &str) -> anyhow::Result<LockClient> {
    if storage == "memory" {
        tracing::warn!("💾 Storage backend: in-memory (locks are only visible to this process)");
        Ok(LockClient::in_memory())
    } else if storage.starts_with("redis://") || storage.starts_with("rediss://") {
        #[cfg(feature = "redis")]
        {
            tracing::info!("💾 Storage backend: Redis");
            LockClient::connect_redis(storage)
                .await
                .context("Failed to connect to Redis")
        }
        #[cfg(not(feature = "redis"))]
        {
            bail!(
                "Redis storage requested but the `redis` feature is not enabled. \
                 Rebuild with: cargo build --features redis"
            )
        }
    } else {
        bail!("Unknown storage backend: '{}'. Use 'memory' or 'redis://...'", storage)
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

pub async fn acquire(
    client: &LockClient,
    cancel: &CancellationToken,
    key: &str,
    config: &LockConfig,
) -> anyhow::Result<u8> {
    let lock = client.try_acquire(cancel, key, config.expiration()).await?;
    print_json(&LockResponse {
        key: lock.key(),
        token: lock.token().as_str(),
        expiration_ms: config.expiration_ms,
    })?;
    Ok(EXIT_SUCCESS)
}

pub async fn release(
    client: &LockClient,
    cancel: &CancellationToken,
    key: &str,
    token: &str,
    config: &LockConfig,
) -> anyhow::Result<u8> {
    client
        .resume(key, token, config.expiration())
        .release(cancel)
        .await?;
    print_json(&StatusResponse {
        key,
        status: "released",
    })?;
    Ok(EXIT_SUCCESS)
}

pub async fn renew(
    client: &LockClient,
    cancel: &CancellationToken,
    key: &str,
    token: &str,
    config: &LockConfig,
) -> anyhow::Result<u8> {
    client
        .resume(key, token, config.expiration())
        .renew(cancel)
        .await?;
    print_json(&StatusResponse {
        key,
        status: "renewed",
    })?;
    Ok(EXIT_SUCCESS)
}

/// Hold `key` for the lifetime of `command`.
///
/// If renewal fails the child is killed, since it is no longer protected.
pub async fn exec(
    client: &LockClient,
    cancel: &CancellationToken,
    key: &str,
    config: &LockConfig,
    command: &[String],
) -> anyhow::Result<u8> {
    let Some((program, args)) = command.split_first() else {
        bail!("no command given");
    };

    let lock = client.acquire_with_config(cancel, key, config).await?;
    let mut renewal = lock.spawn_renewal(config.renew_interval(), config.renew_timeout());

    let mut child = match Command::new(program).args(args).kill_on_drop(true).spawn() {
        Ok(child) => child,
        Err(e) => {
            // Nothing ran; give the lock back before reporting.
            if let Err(release_err) = lock.release(&CancellationToken::new()).await {
                tracing::warn!(key, error = %release_err, "Failed to release lock");
            }
            return Err(e).with_context(|| format!("Failed to start '{}'", program));
        }
    };
    tracing::info!(key, program = %program, "Running command under lock");

    let outcome = tokio::select! {
        status = child.wait() => status.context("Failed to wait for command"),
        ended = &mut renewal => {
            let err = match ended {
                Err(e) => anyhow::Error::new(e),
                Ok(()) => anyhow::anyhow!("lock renewal stopped unexpectedly"),
            };
            tracing::error!(key, error = %err, "Lost the lock, stopping command");
            child.kill().await.ok();
            Err(err.context(format!("Lost lock '{}' while running '{}'", key, program)))
        }
        _ = cancel.cancelled() => {
            child.kill().await.ok();
            Err(anyhow::Error::new(LockError::Cancelled))
        }
    };

    // Release under a new cancellation token: the caller's may already have fired.
    match lock.release(&CancellationToken::new()).await {
        Ok(()) => {}
        Err(LockError::NotHeld) if outcome.is_err() => {}
        Err(e) => tracing::warn!(key, error = %e, "Failed to release lock"),
    }
    renewal.abort();

    let status = outcome?;
    // Killed by a signal when there is no code
    Ok(status
        .code()
        .map_or(EXIT_FAILURE, |code| u8::try_from(code).unwrap_or(EXIT_FAILURE)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_lock_errors() {
        let busy = anyhow::Error::new(LockError::RetriesExhausted(Box::new(LockError::Contested)));
        assert_eq!(exit_code_for(&busy), EXIT_BUSY);

        let lost = anyhow::Error::new(LockError::NotHeld).context("Lost lock 'job'");
        assert_eq!(exit_code_for(&lost), EXIT_NOT_HELD);

        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), EXIT_FAILURE);
    }

    #[tokio::test]
    async fn unknown_storage_is_rejected() {
        assert!(create_client("etcd://localhost").await.is_err());
    }

    #[tokio::test]
    async fn exec_runs_command_and_releases() {
        let client = LockClient::in_memory();
        let cancel = CancellationToken::new();
        let config = LockConfig::default();

        let code = exec(&client, &cancel, "job", &config, &["true".to_string()])
            .await
            .unwrap();
        assert_eq!(code, EXIT_SUCCESS);

        // Released: the key can be taken again right away
        client
            .try_acquire(&cancel, "job", config.expiration())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exec_propagates_child_exit_code() {
        let client = LockClient::in_memory();
        let command = ["sh".to_string(), "-c".to_string(), "exit 7".to_string()];

        let code = exec(&client, &CancellationToken::new(), "job", &LockConfig::default(), &command)
            .await
            .unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn exec_releases_lock_when_command_cannot_start() {
        let client = LockClient::in_memory();
        let cancel = CancellationToken::new();
        let config = LockConfig::default();
        let command = ["keylock-no-such-program".to_string()];

        let err = exec(&client, &cancel, "job", &config, &command)
            .await
            .unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_FAILURE);

        client
            .try_acquire(&cancel, "job", config.expiration())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exec_reports_busy_lock() {
        let client = LockClient::in_memory();
        let cancel = CancellationToken::new();
        let config = LockConfig {
            max_retries: 1,
            retry_interval_ms: 10,
            ..LockConfig::default()
        };
        let _held = client.try_acquire(&cancel, "job", config.expiration()).await.unwrap();

        let err = exec(&client, &cancel, "job", &config, &["true".to_string()])
            .await
            .unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_BUSY);
    }
}
