use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::error::{LockError, LockResult};

/// Handle to a renewal loop running on a background task.
///
/// Await it (or call [`RenewalTask::join`]) to observe how the loop ended.
/// Dropping the handle aborts the loop.
#[derive(Debug)]
pub struct RenewalTask {
    handle: JoinHandle<LockResult<()>>,
}

impl RenewalTask {
    pub(crate) fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = LockResult<()>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut),
        }
    }

    /// Wait for the loop to end.
    ///
    /// `Ok(())` means the lock was released. An aborted task reports
    /// [`LockError::Cancelled`].
    pub async fn join(self) -> LockResult<()> {
        self.await
    }

    /// Stop renewing without releasing the lock.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for RenewalTask {
    type Output = LockResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|res| match res {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(LockError::Cancelled),
        })
    }
}

impl Drop for RenewalTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
