//! Runs against a real server only when `KEYLOCK_REDIS_URL` is set, e.g.
//! `KEYLOCK_REDIS_URL=redis://127.0.0.1/ cargo test --features redis`.

use std::time::Duration;

use keylock_core::infrastructure::LockStore;
use keylock_core::infrastructure_redis::RedisLockStore;
use keylock_core::{LockClient, LockError};
use tokio_util::sync::CancellationToken;

async fn store() -> Option<RedisLockStore> {
    let url = std::env::var("KEYLOCK_REDIS_URL").ok()?;
    Some(RedisLockStore::connect(&url).await.expect("connect to redis"))
}

fn unique_key(name: &str) -> String {
    format!("keylock-test:{}:{}", name, nanoid::nanoid!(8))
}

#[tokio::test]
async fn scripts_enforce_token_ownership() {
    let Some(store) = store().await else { return };
    let key = unique_key("scripts");
    let ttl = Duration::from_secs(5);

    assert!(store.acquire(&key, "owner", ttl).await.unwrap());
    assert!(!store.acquire(&key, "intruder", ttl).await.unwrap());
    // Same token reclaims
    assert!(store.acquire(&key, "owner", ttl).await.unwrap());

    assert!(!store.compare_and_extend(&key, "intruder", ttl).await.unwrap());
    assert!(store.compare_and_extend(&key, "owner", ttl).await.unwrap());

    assert!(!store.compare_and_delete(&key, "intruder").await.unwrap());
    assert!(store.compare_and_delete(&key, "owner").await.unwrap());
    assert!(!store.compare_and_delete(&key, "owner").await.unwrap());
}

#[tokio::test]
async fn end_to_end_against_redis() {
    let Some(store) = store().await else { return };
    let client = LockClient::new(store);
    let cancel = CancellationToken::new();
    let key = unique_key("job");

    let lock = client.try_acquire(&cancel, &key, Duration::from_secs(1)).await.unwrap();
    assert!(matches!(
        client.try_acquire(&cancel, &key, Duration::from_secs(1)).await,
        Err(LockError::Contested)
    ));

    lock.renew(&cancel).await.unwrap();
    lock.release(&cancel).await.unwrap();

    let again = client.try_acquire(&cancel, &key, Duration::from_secs(1)).await.unwrap();
    again.release(&cancel).await.unwrap();
}

#[tokio::test]
async fn key_expires_server_side() {
    let Some(store) = store().await else { return };
    let client = LockClient::new(store);
    let cancel = CancellationToken::new();
    let key = unique_key("expiry");

    let lock = client
        .try_acquire(&cancel, &key, Duration::from_millis(100))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(matches!(lock.renew(&cancel).await, Err(LockError::NotHeld)));
    assert!(matches!(lock.release(&cancel).await, Err(LockError::NotHeld)));
}
