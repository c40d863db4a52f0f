//! File-backed [`CacheStore`]: one JSON file per entry.
//!
//! ```text
//! <dir>/division.json
//! <dir>/department.json
//! <dir>/group.json
//! <dir>/user.json
//! <dir>/interview_sheet_<userKey>_<period>.json
//! <dir>/score_sheet_<userKey>_<period>.json
//! ```
//!
//! Writes go to a uniquely named `.tmp` sibling first and are renamed into
//! place, so a crash mid-write never leaves a truncated `.json` behind.
//! There is no locking: two queries racing on the same miss both write and
//! the last rename wins.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{HarnessError, Result};

use super::{
    format_system_time, CacheEntryInfo, CacheKey, CacheStore, FreshnessPolicy, PresenceOnly,
};

pub struct FsCache {
    dir: PathBuf,
    policy: Box<dyn FreshnessPolicy>,
}

impl FsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_policy(dir, Box::new(PresenceOnly))
    }

    pub fn with_policy(dir: impl Into<PathBuf>, policy: Box<dyn FreshnessPolicy>) -> Self {
        Self {
            dir: dir.into(),
            policy,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }
}

#[async_trait]
impl CacheStore for FsCache {
    async fn has(&self, key: &CacheKey) -> bool {
        let meta = match tokio::fs::metadata(self.path_for(key)).await {
            Ok(m) if m.is_file() => m,
            _ => return false,
        };
        let written_at = meta.modified().unwrap_or_else(|_| SystemTime::now());
        self.policy.is_fresh(written_at, SystemTime::now())
    }

    async fn read(&self, key: &CacheKey) -> Result<Value> {
        let bytes = tokio::fs::read(self.path_for(key)).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| HarnessError::corrupt(key.to_string(), e.to_string()))
    }

    async fn write(&self, key: &CacheKey, data: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let bytes = serde_json::to_vec_pretty(data)
            .map_err(|e| HarnessError::corrupt(key.to_string(), e.to_string()))?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(
            "{}.{}.tmp",
            key.file_stem(),
            uuid::Uuid::new_v4().simple()
        ));

        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "cache entry written");
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<CacheEntryInfo>> {
        let mut infos = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(infos),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            infos.push(CacheEntryInfo {
                name,
                bytes: meta.len(),
                written_at: meta.modified().ok().map(format_system_time),
            });
        }

        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {
                    tokio::fs::remove_file(&path).await?;
                    removed += 1;
                }
                // Leftovers from interrupted writes.
                Some("tmp") => {
                    tokio::fs::remove_file(&path).await?;
                }
                _ => {}
            }
        }

        Ok(removed)
    }
}
