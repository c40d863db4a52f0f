//! Error taxonomy for the cache-and-join engine.
//!
//! Every variant here is a *failure*: it aborts the top-level query and is
//! rendered as the `{ "error": message }` envelope by [`crate::query`].
//! "Nothing matched" and "more than one match" are not errors; they are
//! [`QueryOutcome`](crate::query::QueryOutcome) variants.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Error, Debug)]
pub enum HarnessError {
    /// Login rejected or the login endpoint was unreachable.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Non-success status, transport failure, or unusable body from a data endpoint.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// A cache entry exists but does not hold usable JSON.
    #[error("cache entry '{key}' is corrupt: {reason}")]
    CacheCorrupt { key: String, reason: String },

    /// A self-assessment entry has no manager-assessment counterpart.
    #[error("no manager assessment for evaluation kind {kind_id} ({kind})")]
    Reconciliation { kind_id: String, kind: String },

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        HarnessError::CacheCorrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
