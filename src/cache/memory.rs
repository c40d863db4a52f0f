//! In-memory [`CacheStore`] implementation for tests.
//!
//! Stores raw JSON text behind `std::sync::RwLock`, so tests can also plant
//! corrupt entries with [`InMemoryCache::insert_raw`].

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{HarnessError, Result};

use super::{
    format_system_time, CacheEntryInfo, CacheKey, CacheStore, FreshnessPolicy, PresenceOnly,
};

struct StoredEntry {
    text: String,
    written_at: SystemTime,
}

/// In-memory cache for tests.
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, StoredEntry>>,
    policy: Box<dyn FreshnessPolicy>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_policy(Box::new(PresenceOnly))
    }

    pub fn with_policy(policy: Box<dyn FreshnessPolicy>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Stores `text` verbatim, bypassing serialization.
    pub fn insert_raw(&self, key: CacheKey, text: impl Into<String>) {
        self.insert_raw_at(key, text, SystemTime::now());
    }

    /// Like [`insert_raw`](Self::insert_raw) with an explicit write time.
    pub fn insert_raw_at(&self, key: CacheKey, text: impl Into<String>, written_at: SystemTime) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key,
            StoredEntry {
                text: text.into(),
                written_at,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn has(&self, key: &CacheKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .map(|e| self.policy.is_fresh(e.written_at, SystemTime::now()))
            .unwrap_or(false)
    }

    async fn read(&self, key: &CacheKey) -> Result<Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key).ok_or_else(|| {
            HarnessError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no cache entry for {}", key),
            ))
        })?;
        serde_json::from_str(&entry.text)
            .map_err(|e| HarnessError::corrupt(key.to_string(), e.to_string()))
    }

    async fn write(&self, key: &CacheKey, data: &Value) -> Result<()> {
        let text = serde_json::to_string(data)
            .map_err(|e| HarnessError::corrupt(key.to_string(), e.to_string()))?;
        self.insert_raw(key.clone(), text);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<CacheEntryInfo>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<CacheEntryInfo> = entries
            .iter()
            .map(|(key, e)| CacheEntryInfo {
                name: key.file_stem(),
                bytes: e.text.len() as u64,
                written_at: Some(format_system_time(e.written_at)),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let n = entries.len();
        entries.clear();
        Ok(n)
    }
}
