//! Cache-or-fetch plumbing shared by the organization, user, and evaluation
//! views.
//!
//! An [`Engine`] owns the two collaborators every view needs, the
//! [`Upstream`] client and the [`CacheStore`], and answers "make sure these
//! datasets are cached, then hand me their rows". The views themselves live
//! in [`crate::org`], [`crate::users`] and [`crate::evaluation`].
//!
//! # Refresh rules
//!
//! - A group of master tables is refreshed as a unit: if any member is
//!   missing, one login is performed and every member is refetched in order.
//! - Period-scoped datasets are refreshed individually, but all fetches of
//!   one top-level query share the session opened by the first of them.
//! - Nothing is ever refreshed while it is present; removing the cache entry
//!   is the only way to force a refetch under the default policy.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::cache::{CacheKey, CacheStore, FreshnessPolicy, FsCache, MaxAge, PresenceOnly};
use crate::config::{Config, EvaluationConfig};
use crate::error::Result;
use crate::models::table_rows;
use crate::upstream::{payload_for, Dataset, HttpUpstream, PeriodScope, SessionSlot, Upstream};

pub struct Engine {
    upstream: Arc<dyn Upstream>,
    cache: Arc<dyn CacheStore>,
    proc_user_key: String,
    evaluation: EvaluationConfig,
}

impl Engine {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        cache: Arc<dyn CacheStore>,
        proc_user_key: impl Into<String>,
        evaluation: EvaluationConfig,
    ) -> Self {
        Self {
            upstream,
            cache,
            proc_user_key: proc_user_key.into(),
            evaluation,
        }
    }

    /// Production wiring: HTTP upstream and file cache from the config.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let upstream = HttpUpstream::new(config.upstream.clone(), &config.credentials)?;
        let policy: Box<dyn FreshnessPolicy> = match config.cache.max_age_secs {
            Some(secs) => Box::new(MaxAge(Duration::from_secs(secs))),
            None => Box::new(PresenceOnly),
        };
        let cache = FsCache::with_policy(config.cache.dir.clone(), policy);
        Ok(Self::new(
            Arc::new(upstream),
            Arc::new(cache),
            config.credentials.proc_user_key.clone(),
            config.evaluation.clone(),
        ))
    }

    pub fn cache(&self) -> &dyn CacheStore {
        self.cache.as_ref()
    }

    pub fn evaluation_config(&self) -> &EvaluationConfig {
        &self.evaluation
    }

    /// Opens a per-query session slot over this engine's upstream.
    pub(crate) fn session_slot(&self) -> SessionSlot<'_> {
        SessionSlot::new(self.upstream.as_ref())
    }

    /// Makes sure every table in `datasets` is cached.
    ///
    /// When at least one is missing, the query's session refetches all of
    /// them in the given order.
    pub(crate) async fn ensure_tables(
        &self,
        datasets: &[Dataset],
        slot: &mut SessionSlot<'_>,
    ) -> Result<()> {
        let mut missing = false;
        for dataset in datasets {
            if !self.cache.has(&CacheKey::table(*dataset)).await {
                missing = true;
                break;
            }
        }
        if !missing {
            return Ok(());
        }

        let names: Vec<&str> = datasets.iter().map(|d| d.name()).collect();
        tracing::info!(datasets = ?names, "cache miss, refreshing tables");

        let session = slot.session().await?;
        for dataset in datasets {
            let payload = payload_for(*dataset, &self.proc_user_key, None);
            let data = self.upstream.fetch(*dataset, &payload, session).await?;
            self.cache.write(&CacheKey::table(*dataset), &data).await?;
        }
        Ok(())
    }

    /// Makes sure one period-scoped dataset is cached and returns its blob.
    pub(crate) async fn load_scoped(
        &self,
        dataset: Dataset,
        scope: PeriodScope<'_>,
        slot: &mut SessionSlot<'_>,
    ) -> Result<Value> {
        let key = CacheKey::scoped(dataset, scope);
        if !self.cache.has(&key).await {
            tracing::info!(cache_key = %key, "cache miss, fetching");
            let session = slot.session().await?;
            let payload = payload_for(dataset, &self.proc_user_key, Some(scope));
            let data = self.upstream.fetch(dataset, &payload, session).await?;
            self.cache.write(&key, &data).await?;
        }
        self.cache.read(&key).await
    }

    /// Reads a cached master table and decodes its rows.
    pub(crate) async fn load_table<T>(&self, dataset: Dataset) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let key = CacheKey::table(dataset);
        let blob = self.cache.read(&key).await?;
        table_rows(&key, blob)
    }
}
