//! Test double for [`LockStore`]: records every call and can replay scripted
//! replies before falling back to a real in-memory store.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::infrastructure::LockStore;
use crate::infrastructure_in_memory::InMemoryLockStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Acquire,
    Delete,
    Extend,
}

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Reply(bool),
    Fail(&'static str),
    /// Never answers.
    Hang,
    /// Answer from the in-memory store after a delay.
    Delay(Duration),
    /// Apply the call to the in-memory store at once, but reply after a delay.
    Late(Duration),
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub op: Op,
    pub key: String,
    pub token: String,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedStore {
    pub inner: InMemoryLockStore,
    script: Mutex<HashMap<Op, VecDeque<Scripted>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `replies` for the next calls of `op`, in order.
    pub fn script(&self, op: Op, replies: impl IntoIterator<Item = Scripted>) {
        self.script
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .extend(replies);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, op: Op) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    async fn intercept<F>(&self, op: Op, key: &str, token: &str, real: F) -> Result<bool, StoreError>
    where
        F: Future<Output = Result<bool, StoreError>>,
    {
        self.calls.lock().unwrap().push(Call {
            op,
            key: key.to_string(),
            token: token.to_string(),
            at: Instant::now(),
        });
        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);

        match next {
            None => real.await,
            Some(Scripted::Reply(flag)) => Ok(flag),
            Some(Scripted::Fail(msg)) => Err(StoreError::Backend(msg.to_string())),
            Some(Scripted::Hang) => std::future::pending().await,
            Some(Scripted::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                real.await
            }
            Some(Scripted::Late(delay)) => {
                let reply = real.await;
                tokio::time::sleep(delay).await;
                reply
            }
        }
    }
}

#[async_trait]
impl LockStore for ScriptedStore {
    async fn acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.intercept(Op::Acquire, key, token, self.inner.acquire(key, token, ttl))
            .await
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        self.intercept(Op::Delete, key, token, self.inner.compare_and_delete(key, token))
            .await
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let real = self.inner.compare_and_extend(key, token, ttl);
        self.intercept(Op::Extend, key, token, real).await
    }
}
