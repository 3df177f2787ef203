//! Redis-backed [`LockStore`] implementation.
//!
//! Each operation is a Lua script so the ownership check and the mutation run
//! as one server-side transaction.
//!
//! Enable with the `redis` feature flag:
//! ```toml
//! keylock-core = { path = "../keylock-core", features = ["redis"] }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::error::StoreError;
use crate::infrastructure::LockStore;

const LOCK_SCRIPT: &str = include_str!("../scripts/lock.lua");
const UNLOCK_SCRIPT: &str = include_str!("../scripts/unlock.lua");
const REFRESH_SCRIPT: &str = include_str!("../scripts/refresh.lua");

/// A lock store talking to a single Redis server.
///
/// `ConnectionManager` reconnects on its own; cloning it is cheap.
#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
    lock: Script,
    unlock: Script,
    refresh: Script,
}

impl RedisLockStore {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(conn))
    }

    /// Wrap an existing connection manager.
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            lock: Script::new(LOCK_SCRIPT),
            unlock: Script::new(UNLOCK_SCRIPT),
            refresh: Script::new(REFRESH_SCRIPT),
        }
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        // PX/PEXPIRE reject 0
        (ttl.as_millis().min(u64::MAX as u128) as u64).max(1)
    }

    // A nil reply means the key did not exist.
    fn as_flag(reply: Option<i64>) -> Result<bool, StoreError> {
        match reply {
            None | Some(0) => Ok(false),
            Some(1) => Ok(true),
            Some(other) => Err(StoreError::UnexpectedReply(other.to_string())),
        }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<i64> = self
            .lock
            .key(key)
            .arg(token)
            .arg(Self::ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Self::as_flag(reply)
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<i64> = self
            .unlock
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Self::as_flag(reply)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<i64> = self
            .refresh
            .key(key)
            .arg(token)
            .arg(Self::ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Self::as_flag(reply)
    }
}
