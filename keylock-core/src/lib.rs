//! # keylock-core
//!
//! Mutual exclusion between processes, coordinated through one external
//! key-value store. Provides token-verified acquisition with retries,
//! ownership-checked release and renewal, a renewal watchdog, and in-process
//! deduplication of concurrent acquisitions.

mod bounded;
pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "redis")]
#[path = "infrastructure_redis.rs"]
pub mod infrastructure_redis;
pub mod lock;
pub mod renewal;
pub mod retry;
pub mod types;

pub use client::LockClient;
pub use error::{LockError, LockResult, StoreError};
pub use lock::Lock;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod config_test;
