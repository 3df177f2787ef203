use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// The three atomic operations the lock protocol needs from its store.
///
/// Each operation must execute server-side as one indivisible step; a
/// client-side GET followed by DEL/EXPIRE would race with other owners.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `token` with a time-to-live of `ttl` if the key is absent.
    /// If the key already holds `token`, refresh its TTL instead.
    ///
    /// Returns whether `token` owns the key afterwards.
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete `key` only if it currently holds `token`.
    ///
    /// Returns `false` when the key is absent or holds another token.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, StoreError>;

    /// Reset the TTL of `key` to `ttl` only if it currently holds `token`.
    ///
    /// Returns `false` when the key is absent or holds another token.
    async fn compare_and_extend(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;
}
