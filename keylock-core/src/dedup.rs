//! Coalescing of concurrent acquisition requests for the same key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{LockError, LockResult};
use crate::lock::Lock;

type Outcome = LockResult<Lock>;
type OutcomeReceiver = watch::Receiver<Option<Outcome>>;

/// Registry of acquisitions currently in flight in this process, by key.
///
/// The first caller for a key becomes the leader and runs the real
/// acquisition; callers arriving while it runs wait for the leader's outcome
/// instead of issuing their own store calls. The entry is removed as soon as
/// the leader finishes, so outcomes are never reused across time.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    inflight: Mutex<HashMap<String, OutcomeReceiver>>,
}

enum Role {
    Leader(watch::Sender<Option<Outcome>>),
    Follower(OutcomeReceiver),
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with an acquisition in flight.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, OutcomeReceiver>> {
        // The map stays consistent even if a holder panicked.
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self, key: &str) -> Role {
        let mut entries = self.entries();
        if let Some(rx) = entries.get(key) {
            return Role::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        entries.insert(key.to_owned(), rx);
        Role::Leader(tx)
    }

    fn forget(&self, key: &str) {
        self.entries().remove(key);
    }

    /// Run `op` for `key`, unless an identical request is already in flight,
    /// in which case wait for and return its outcome.
    ///
    /// A follower's wait races `cancel` and yields [`LockError::Cancelled`]
    /// if it fires first. If the leader is dropped or cancelled before
    /// finishing, waiting followers start over and one of them takes the lead.
    pub async fn run<F, Fut>(&self, key: &str, cancel: &CancellationToken, op: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let tx = loop {
            match self.join(key) {
                Role::Leader(tx) => break tx,
                Role::Follower(rx) => {
                    debug!(key, "Joining in-flight lock acquisition");
                    if let Some(outcome) = Self::follow(rx, cancel).await {
                        return outcome;
                    }
                }
            }
        };

        let guard = LeaderGuard {
            registry: self,
            key,
            tx: Some(tx),
        };
        let outcome = op().await;
        if matches!(outcome, Err(LockError::Cancelled)) {
            // The leader's own cancellation is not the followers' outcome.
            // Dropping the guard lets one of them take over.
            drop(guard);
            return outcome;
        }
        guard.publish(outcome.clone());
        outcome
    }

    // `None` means the leader went away without an outcome.
    async fn follow(mut rx: OutcomeReceiver, cancel: &CancellationToken) -> Option<Outcome> {
        let published = async move {
            rx.wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|outcome| outcome.clone())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Some(Err(LockError::Cancelled)),
            outcome = published => outcome,
        }
    }
}

/// Clears the leader's registry entry on completion, or on drop if the
/// leader's future is abandoned mid-flight.
struct LeaderGuard<'a> {
    registry: &'a InFlightRegistry,
    key: &'a str,
    tx: Option<watch::Sender<Option<Outcome>>>,
}

impl LeaderGuard<'_> {
    fn publish(mut self, outcome: Outcome) {
        if let Some(tx) = self.tx.take() {
            self.registry.forget(self.key);
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        // Forget before closing the channel so woken followers cannot find
        // the dead entry again.
        if let Some(tx) = self.tx.take() {
            self.registry.forget(self.key);
            drop(tx);
        }
    }
}
