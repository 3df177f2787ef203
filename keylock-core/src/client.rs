//! High-level client that wraps a pluggable [`LockStore`] with the
//! acquisition protocol. The CLI delegates to this.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bounded::bounded;
use crate::config::LockConfig;
use crate::dedup::InFlightRegistry;
use crate::error::{LockError, LockResult};
use crate::infrastructure::LockStore;
use crate::infrastructure_in_memory::InMemoryLockStore;
use crate::lock::Lock;
use crate::retry::RetryStrategy;
use crate::types::{OwnershipToken, TokenSource};

/// The main entry point: acquires locks on keys of one store.
pub struct LockClient {
    store: Arc<dyn LockStore>,
    tokens: TokenSource,
    /// Scoped to this client, never shared process-wide.
    in_flight: InFlightRegistry,
}

impl LockClient {
    pub fn new(store: impl LockStore + 'static) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            tokens: TokenSource::default(),
            in_flight: InFlightRegistry::new(),
        }
    }

    /// A client over a fresh process-local store.
    pub fn in_memory() -> Self {
        Self::new(InMemoryLockStore::new())
    }

    /// A client backed by the Redis server at `url`.
    #[cfg(feature = "redis")]
    pub async fn connect_redis(url: &str) -> Result<Self, crate::error::StoreError> {
        let store = crate::infrastructure_redis::RedisLockStore::connect(url).await?;
        Ok(Self::new(store))
    }

    /// Replace the ownership token generator.
    pub fn with_token_source(mut self, tokens: TokenSource) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    /// Acquisitions currently being coalesced by
    /// [`LockClient::acquire_deduplicated`].
    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Try once to take `key` for `expiration`.
    ///
    /// Fails with [`LockError::Contested`] if someone else holds the key.
    /// Store failures are returned as they are.
    pub async fn try_acquire(
        &self,
        cancel: &CancellationToken,
        key: &str,
        expiration: Duration,
    ) -> LockResult<Lock> {
        let token = self.tokens.next();
        let acquired = bounded(
            cancel,
            None,
            self.store.acquire(key, token.as_str(), expiration),
        )
        .await?;

        if acquired {
            info!(key, token = token.redacted(), "Lock acquired");
            Ok(self.new_lock(key, token, expiration))
        } else {
            Err(LockError::Contested)
        }
    }

    /// Take `key` for `expiration`, retrying per `retry`.
    ///
    /// A single token is used for every attempt of this call. Each attempt is
    /// bounded by `per_attempt_timeout`. Contention and timed-out attempts are
    /// retried; any other store error aborts at once without consulting
    /// `retry`. When `retry` gives up, the last cause is wrapped in
    /// [`LockError::RetriesExhausted`]. `cancel` aborts the call at any point
    /// with [`LockError::Cancelled`].
    pub async fn acquire<R: RetryStrategy>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        expiration: Duration,
        mut retry: R,
        per_attempt_timeout: Duration,
    ) -> LockResult<Lock> {
        let token = self.tokens.next();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = bounded(
                cancel,
                Some(per_attempt_timeout),
                self.store.acquire(key, token.as_str(), expiration),
            )
            .await;

            let cause = match outcome {
                Ok(true) => {
                    info!(key, attempt, token = token.redacted(), "Lock acquired");
                    return Ok(self.new_lock(key, token, expiration));
                }
                Ok(false) => LockError::Contested,
                Err(e) if e.is_timeout() => e,
                // Cancellation and infrastructure failures are not retried.
                Err(e) => return Err(e),
            };

            let Some(interval) = retry.next_interval() else {
                debug!(key, attempt, cause = %cause, "Lock retries exhausted");
                return Err(LockError::RetriesExhausted(Box::new(cause)));
            };
            debug!(key, attempt, cause = %cause, ?interval, "Lock attempt failed, retrying");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LockError::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// [`LockClient::acquire`], coalescing concurrent calls for the same key
    /// made through this client into one underlying acquisition.
    ///
    /// Every coalesced caller receives the same outcome. On success they all
    /// hold clones of the *same* [`Lock`]: only one of them should release it,
    /// and they must agree among themselves on which one. `retry` is used only
    /// if this caller ends up running the acquisition.
    pub async fn acquire_deduplicated<R: RetryStrategy>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        expiration: Duration,
        retry: R,
        per_attempt_timeout: Duration,
    ) -> LockResult<Lock> {
        self.in_flight
            .run(key, cancel, || {
                self.acquire(cancel, key, expiration, retry, per_attempt_timeout)
            })
            .await
    }

    /// [`LockClient::acquire`] with the expiration, retry policy and attempt
    /// timeout taken from `config`.
    pub async fn acquire_with_config(
        &self,
        cancel: &CancellationToken,
        key: &str,
        config: &LockConfig,
    ) -> LockResult<Lock> {
        self.acquire(
            cancel,
            key,
            config.expiration(),
            config.fixed_retry(),
            config.attempt_timeout(),
        )
        .await
    }

    /// Rebuild a handle for a token obtained earlier, e.g. by another process
    /// invocation. Nothing is checked until the handle is released or renewed.
    pub fn resume(
        &self,
        key: &str,
        token: impl Into<OwnershipToken>,
        expiration: Duration,
    ) -> Lock {
        self.new_lock(key, token.into(), expiration)
    }

    fn new_lock(&self, key: &str, token: OwnershipToken, expiration: Duration) -> Lock {
        Lock::new(Arc::clone(&self.store), key.to_string(), token, expiration)
    }
}
