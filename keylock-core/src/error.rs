use std::sync::Arc;

use thiserror::Error;

/// Errors raised by a [`LockStore`](crate::infrastructure::LockStore) backend.
///
/// These are infrastructure failures: the store could not answer, or answered
/// with something the protocol does not expect.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// An error reported by the Redis client.
    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    /// The store replied with a value the lock protocol does not understand.
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),

    /// A backend-specific failure without a richer error type.
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this failure is a timeout reported by the backend itself.
    pub fn is_timeout(&self) -> bool {
        match self {
            #[cfg(feature = "redis")]
            StoreError::Redis(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Everything that can go wrong while acquiring, releasing or renewing a lock.
///
/// `LockError` is `Clone` so that every caller coalesced onto one
/// deduplicated acquisition observes the identical outcome.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// The key is already held by another owner.
    #[error("lock is held by another owner")]
    Contested,

    /// The store does not hold this handle's token under the key: it expired,
    /// was taken over, or was never acquired.
    #[error("lock is not held by this owner")]
    NotHeld,

    /// The retry strategy gave up; carries the cause of the last attempt.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(#[source] Box<LockError>),

    /// A single store round-trip exceeded its time bound.
    #[error("store operation timed out")]
    Timeout,

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport or protocol failure, passed through untouched.
    #[error(transparent)]
    Store(Arc<StoreError>),
}

impl LockError {
    /// Timeout-class errors are treated as transient by the retry and renewal
    /// loops.
    pub fn is_timeout(&self) -> bool {
        match self {
            LockError::Timeout => true,
            LockError::Store(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// The innermost cause, looking through `RetriesExhausted` wrappers.
    pub fn root_cause(&self) -> &LockError {
        match self {
            LockError::RetriesExhausted(inner) => inner.root_cause(),
            other => other,
        }
    }
}

impl From<StoreError> for LockError {
    fn from(e: StoreError) -> Self {
        LockError::Store(Arc::new(e))
    }
}

pub type LockResult<T> = Result<T, LockError>;
