//! The handle for one confirmed acquisition.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded::bounded;
use crate::error::{LockError, LockResult};
use crate::infrastructure::LockStore;
use crate::renewal::RenewalTask;
use crate::types::OwnershipToken;

/// A lock the store confirmed as ours at acquisition time.
///
/// Holding a `Lock` does not prove ownership: the key may have expired or been
/// taken over since. [`Lock::release`] and [`Lock::renew`] re-verify against
/// the store and report [`LockError::NotHeld`] when the token no longer
/// matches.
///
/// Clones share state, including the stop signal of the renewal loop.
#[derive(Clone)]
pub struct Lock {
    inner: Arc<LockInner>,
}

struct LockInner {
    store: Arc<dyn LockStore>,
    key: String,
    token: OwnershipToken,
    expiration: Duration,
    /// Fired once, by the successful release.
    stop: CancellationToken,
    released: AtomicBool,
    /// Releases currently talking to the store.
    releasing: AtomicUsize,
    release_settled: Notify,
}

/// Counts a release as in flight until it is dropped.
struct ReleaseInFlight<'a>(&'a LockInner);

impl<'a> ReleaseInFlight<'a> {
    fn enter(inner: &'a LockInner) -> Self {
        inner.releasing.fetch_add(1, Ordering::AcqRel);
        Self(inner)
    }
}

impl Drop for ReleaseInFlight<'_> {
    fn drop(&mut self) {
        self.0.releasing.fetch_sub(1, Ordering::AcqRel);
        self.0.release_settled.notify_waiters();
    }
}

impl Lock {
    pub(crate) fn new(
        store: Arc<dyn LockStore>,
        key: String,
        token: OwnershipToken,
        expiration: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(LockInner {
                store,
                key,
                token,
                expiration,
                stop: CancellationToken::new(),
                released: AtomicBool::new(false),
                releasing: AtomicUsize::new(0),
                release_settled: Notify::new(),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn token(&self) -> &OwnershipToken {
        &self.inner.token
    }

    pub fn expiration(&self) -> Duration {
        self.inner.expiration
    }

    /// Whether [`Lock::release`] already succeeded on this handle or a clone.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Whether `other` is a clone of this handle.
    pub fn same_handle(&self, other: &Lock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Delete the key if it still holds our token, and stop any renewal loop.
    ///
    /// Returns [`LockError::NotHeld`] if the key is gone, holds another token,
    /// or this handle was already released.
    pub async fn release(&self, cancel: &CancellationToken) -> LockResult<()> {
        if self.is_released() {
            return Err(LockError::NotHeld);
        }
        let _in_flight = ReleaseInFlight::enter(&self.inner);

        let held = bounded(
            cancel,
            None,
            self.inner
                .store
                .compare_and_delete(&self.inner.key, self.inner.token.as_str()),
        )
        .await?;
        if !held {
            return Err(LockError::NotHeld);
        }

        // The store already arbitrated between concurrent releases; only one
        // of them can observe `held`.
        if self
            .inner
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LockError::NotHeld);
        }
        self.inner.stop.cancel();

        info!(key = %self.inner.key, token = self.inner.token.redacted(), "Lock released");
        Ok(())
    }

    /// Wait for in-flight releases to settle, then report whether one of them
    /// succeeded.
    async fn released_concurrently(&self) -> bool {
        loop {
            // Registered before the check, so a settle in between is not missed.
            let settled = self.inner.release_settled.notified();
            if self.inner.releasing.load(Ordering::Acquire) == 0 {
                return self.is_released();
            }
            settled.await;
        }
    }

    /// Reset the key's TTL to the handle's expiration if it still holds our
    /// token.
    pub async fn renew(&self, cancel: &CancellationToken) -> LockResult<()> {
        self.extend(cancel, None).await
    }

    async fn extend(&self, cancel: &CancellationToken, limit: Option<Duration>) -> LockResult<()> {
        let held = bounded(
            cancel,
            limit,
            self.inner.store.compare_and_extend(
                &self.inner.key,
                self.inner.token.as_str(),
                self.inner.expiration,
            ),
        )
        .await?;
        if held {
            Ok(())
        } else {
            Err(LockError::NotHeld)
        }
    }

    /// Renew the lock every `interval` until it is released.
    ///
    /// Each renewal is bounded by `per_renew_timeout`. A renewal that times
    /// out is retried at once instead of waiting for the next period. Any
    /// other failure, [`LockError::NotHeld`] included, ends the loop with that
    /// error: the critical section is no longer protected.
    ///
    /// Returns `Ok(())` once [`Lock::release`] succeeds, including when the
    /// release removes the key while a renewal is in flight.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub async fn run_renewal_loop(
        &self,
        interval: Duration,
        per_renew_timeout: Duration,
    ) -> LockResult<()> {
        let stop = &self.inner.stop;
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut retry_now = false;
        loop {
            if !retry_now {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return Ok(()),
                    _ = ticker.tick() => {}
                }
            }

            match self.extend(stop, Some(per_renew_timeout)).await {
                Ok(()) => {
                    retry_now = false;
                    debug!(key = %self.inner.key, "Lock renewed");
                }
                // Only the stop signal is raced here.
                Err(LockError::Cancelled) => return Ok(()),
                Err(e) if e.is_timeout() => {
                    warn!(key = %self.inner.key, error = %e, "Lock renewal timed out, retrying");
                    retry_now = true;
                }
                Err(LockError::NotHeld) => {
                    // A release racing this renewal may already have removed the key.
                    if self.released_concurrently().await {
                        return Ok(());
                    }
                    warn!(key = %self.inner.key, "Lock no longer held, giving up renewal");
                    return Err(LockError::NotHeld);
                }
                Err(e) => {
                    warn!(key = %self.inner.key, error = %e, "Lock renewal failed, giving up");
                    return Err(e);
                }
            }
        }
    }

    /// Run [`Lock::run_renewal_loop`] on a background tokio task.
    pub fn spawn_renewal(&self, interval: Duration, per_renew_timeout: Duration) -> RenewalTask {
        let lock = self.clone();
        RenewalTask::spawn(async move { lock.run_renewal_loop(interval, per_renew_timeout).await })
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.inner.key)
            .field("token", &self.inner.token.redacted())
            .field("expiration", &self.inner.expiration)
            .field("released", &self.is_released())
            .finish()
    }
}
