//! Process-local [`LockStore`] backed by a mutex-guarded map.
//!
//! Useful for tests and single-process deployments. Expiry is measured with
//! `tokio::time::Instant`, so a paused tokio clock controls it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::infrastructure::LockStore;

// Roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone)]
struct Entry {
    token: String,
    expires_at: Instant,
}

impl Entry {
    /// Deadline `ttl` after `now`, saturating for TTLs the clock cannot represent.
    fn deadline(now: Instant, ttl: Duration) -> Instant {
        now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    // Map of key -> current owner
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token currently stored under `key`, if it has not expired.
    pub fn current_token(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .ok()?
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.token.clone())
    }

    /// Remaining time-to-live of `key`, if it has not expired.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .ok()?
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now)
    }

    /// Drop expired entries. Returns the number removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        match self.entries.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, e| e.is_live(now));
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>, Instant) -> T,
    ) -> Result<T, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store mutex poisoned".into()))?;
        Ok(f(&mut entries, Instant::now()))
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_entries(|entries, now| match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                if entry.token == token {
                    entry.expires_at = Entry::deadline(now, ttl);
                    true
                } else {
                    false
                }
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        token: token.to_string(),
                        expires_at: Entry::deadline(now, ttl),
                    },
                );
                true
            }
        })
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        self.with_entries(|entries, now| match entries.get(key) {
            Some(entry) if entry.is_live(now) && entry.token == token => {
                entries.remove(key);
                true
            }
            _ => false,
        })
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.with_entries(|entries, now| match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.token == token => {
                entry.expires_at = Entry::deadline(now, ttl);
                true
            }
            _ => false,
        })
    }
}
