use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{LockError, LockResult, StoreError};

/// Run one store round-trip, racing it against `cancel` and, when given,
/// against a `limit` on its duration.
///
/// Cancellation maps to [`LockError::Cancelled`], the limit to
/// [`LockError::Timeout`]; store failures pass through as
/// [`LockError::Store`].
pub(crate) async fn bounded<T, F>(
    cancel: &CancellationToken,
    limit: Option<Duration>,
    op: F,
) -> LockResult<T>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let op = async {
        match limit {
            Some(limit) => match tokio::time::timeout(limit, op).await {
                Ok(res) => res.map_err(LockError::from),
                Err(_) => Err(LockError::Timeout),
            },
            None => op.await.map_err(LockError::from),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LockError::Cancelled),
        res = op => res,
    }
}
