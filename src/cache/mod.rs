//! Cache abstraction for raw upstream payloads.
//!
//! The [`CacheStore`] trait maps a logical dataset (plus an optional sub-key
//! such as `<userKey>_<period>`) to a JSON blob. Two backends ship with the
//! crate:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`FsCache`] | [`fs`] | one JSON file per entry, production |
//! | [`InMemoryCache`] | [`memory`] | tests |
//!
//! Whether an entry counts as present is decided by a [`FreshnessPolicy`].
//! The default, [`PresenceOnly`], treats every stored entry as valid forever:
//! an entry is only refetched after it has been removed. [`MaxAge`] expires
//! entries by age without touching any caller.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod fs;
pub mod memory;

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::upstream::{Dataset, PeriodScope};

pub use fs::FsCache;
pub use memory::InMemoryCache;

/// Identity of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub dataset: &'static str,
    /// `(user_key, period)` for per-period datasets.
    pub scope: Option<(String, String)>,
}

impl CacheKey {
    /// Key for an unscoped master table.
    pub fn table(dataset: Dataset) -> Self {
        Self {
            dataset: dataset.name(),
            scope: None,
        }
    }

    /// Key for a per-(user, period) dataset.
    pub fn scoped(dataset: Dataset, scope: PeriodScope<'_>) -> Self {
        Self {
            dataset: dataset.name(),
            scope: Some((scope.user_key.to_string(), scope.period.to_string())),
        }
    }

    /// File-safe, stable name derived only from the key itself.
    ///
    /// Scoped keys are written as `<dataset>_<userKey>_<period>` when both
    /// parts are restricted to `[A-Za-z0-9._-]` and the user key has no `_`,
    /// so the first separator always splits the two parts. Anything else is
    /// replaced by a short SHA-256 digest of the two parts.
    pub fn file_stem(&self) -> String {
        match &self.scope {
            None => self.dataset.to_string(),
            Some((user, period))
                if is_file_safe(user) && is_file_safe(period) && !user.contains('_') =>
            {
                format!("{}_{}_{}", self.dataset, user, period)
            }
            Some((user, period)) => {
                let mut hasher = Sha256::new();
                hasher.update(user.as_bytes());
                hasher.update([0u8]);
                hasher.update(period.as_bytes());
                format!("{}_{}", self.dataset, &hex::encode(hasher.finalize())[..16])
            }
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some((user, period)) => write!(f, "{}[{}_{}]", self.dataset, user, period),
            None => write!(f, "{}", self.dataset),
        }
    }
}

fn is_file_safe(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Decides whether a stored entry may be served.
pub trait FreshnessPolicy: Send + Sync {
    fn is_fresh(&self, written_at: SystemTime, now: SystemTime) -> bool;
}

/// Presence is freshness: a stored entry never expires.
#[derive(Debug, Default, Clone, Copy)]
pub struct PresenceOnly;

impl FreshnessPolicy for PresenceOnly {
    fn is_fresh(&self, _written_at: SystemTime, _now: SystemTime) -> bool {
        true
    }
}

/// Entries older than the given age are treated as absent.
#[derive(Debug, Clone, Copy)]
pub struct MaxAge(pub Duration);

impl FreshnessPolicy for MaxAge {
    fn is_fresh(&self, written_at: SystemTime, now: SystemTime) -> bool {
        match now.duration_since(written_at) {
            Ok(age) => age <= self.0,
            // Written "in the future" (clock skew): keep it.
            Err(_) => true,
        }
    }
}

/// One stored entry, as reported by [`CacheStore::entries`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub name: String,
    pub bytes: u64,
    /// Last write time (ISO 8601), when the backend knows it.
    pub written_at: Option<String>,
}

/// Abstract storage for raw upstream payloads.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`has`](CacheStore::has) | entry present and fresh |
/// | [`read`](CacheStore::read) | parse the stored JSON |
/// | [`write`](CacheStore::write) | store JSON, replacing atomically |
/// | [`entries`](CacheStore::entries) | list stored entries |
/// | [`clear`](CacheStore::clear) | remove every entry |
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn has(&self, key: &CacheKey) -> bool;

    /// Fails with [`CacheCorrupt`](crate::error::HarnessError::CacheCorrupt)
    /// when the entry exists but is not valid JSON.
    async fn read(&self, key: &CacheKey) -> Result<Value>;

    /// A half-written entry must never be observable as valid.
    async fn write(&self, key: &CacheKey, data: &Value) -> Result<()>;

    async fn entries(&self) -> Result<Vec<CacheEntryInfo>>;

    /// Removes every entry and returns how many were removed.
    async fn clear(&self) -> Result<usize>;
}

pub(crate) fn format_system_time(t: SystemTime) -> String {
    let dt: chrono::DateTime<chrono::Utc> = t.into();
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
