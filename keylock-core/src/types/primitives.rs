use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The value written under a lock key, proving which acquisition request
/// currently owns it.
///
/// One token is minted per logical acquisition call and reused across that
/// call's retry attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnershipToken(String);

impl OwnershipToken {
    /// A fresh 21-character URL-safe random token.
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to put in logs.
    pub fn redacted(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(6)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl From<String> for OwnershipToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OwnershipToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for OwnershipToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces ownership tokens for a [`LockClient`](crate::client::LockClient).
#[derive(Clone)]
pub struct TokenSource(Arc<dyn Fn() -> OwnershipToken + Send + Sync>);

impl TokenSource {
    pub fn new(f: impl Fn() -> OwnershipToken + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn next(&self) -> OwnershipToken {
        (self.0)()
    }
}

impl Default for TokenSource {
    fn default() -> Self {
        Self::new(OwnershipToken::generate)
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSource")
    }
}
