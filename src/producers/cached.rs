//! Producers behind the shared TTL cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    AgentInfo, AgentLister, Bead, BeadLister, ProgressProvider, Producers, RunLister, RunRecord,
    TaskProgress,
};
use crate::cache::{CacheStats, TtlCache};
use crate::errors::{FetchError, ProducerError};

pub const AGENTS_KEY: &str = "agents";
pub const BEADS_KEY: &str = "beads";
pub const RUNS_KEY: &str = "runs";
pub const PROGRESS_KEY: &str = "progress";

/// Every cache key this wrapper owns.
pub const ALL_KEYS: [&str; 4] = [AGENTS_KEY, BEADS_KEY, RUNS_KEY, PROGRESS_KEY];

/// One cached producer result.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Agents(Arc<Vec<AgentInfo>>),
    Beads(Arc<Vec<Bead>>),
    Runs(Arc<Vec<RunRecord>>),
    Progress(Arc<TaskProgress>),
}

/// Wraps [`Producers`] so every read goes through `TtlCache::get_or_fetch`.
///
/// Implements the producer traits itself, so the monitor and the route
/// handlers can use it wherever a plain producer is expected.
#[derive(Clone)]
pub struct CachedProducers {
    inner: Producers,
    cache: TtlCache<Snapshot>,
}

fn mismatch(key: &str) -> ProducerError {
    FetchError::new(anyhow::anyhow!("cache entry '{}' holds the wrong snapshot type", key)).into()
}

impl CachedProducers {
    pub fn new(inner: Producers, max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(max_entries, ttl),
        }
    }

    pub fn cache(&self) -> &TtlCache<Snapshot> {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop the cached value (and any in-flight marker) for `key`.
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.delete(key)
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    async fn fetch<F, Fut>(&self, key: &'static str, f: F) -> Result<Snapshot, ProducerError>
    where
        F: FnOnce(Producers) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<Snapshot, ProducerError>> + Send + 'static,
    {
        let producers = self.inner.clone();
        let ttl = self.cache.default_ttl();
        self.cache
            .get_or_fetch(key, move || async move { Ok(f(producers).await?) }, ttl)
            .await
            .map_err(ProducerError::from)
    }
}

#[async_trait]
impl AgentLister for CachedProducers {
    async fn list_agents(&self) -> Result<Vec<AgentInfo>, ProducerError> {
        let snapshot = self
            .fetch(AGENTS_KEY, |p| async move {
                Ok(Snapshot::Agents(Arc::new(p.agents.list_agents().await?)))
            })
            .await?;
        match snapshot {
            Snapshot::Agents(agents) => Ok(agents.as_ref().clone()),
            _ => Err(mismatch(AGENTS_KEY)),
        }
    }
}

#[async_trait]
impl BeadLister for CachedProducers {
    async fn list_beads(&self) -> Result<Vec<Bead>, ProducerError> {
        let snapshot = self
            .fetch(BEADS_KEY, |p| async move {
                Ok(Snapshot::Beads(Arc::new(p.beads.list_beads().await?)))
            })
            .await?;
        match snapshot {
            Snapshot::Beads(beads) => Ok(beads.as_ref().clone()),
            _ => Err(mismatch(BEADS_KEY)),
        }
    }
}

#[async_trait]
impl RunLister for CachedProducers {
    async fn list_runs(&self) -> Result<Vec<RunRecord>, ProducerError> {
        let snapshot = self
            .fetch(RUNS_KEY, |p| async move {
                Ok(Snapshot::Runs(Arc::new(p.runs.list_runs().await?)))
            })
            .await?;
        match snapshot {
            Snapshot::Runs(runs) => Ok(runs.as_ref().clone()),
            _ => Err(mismatch(RUNS_KEY)),
        }
    }
}

#[async_trait]
impl ProgressProvider for CachedProducers {
    async fn task_progress(&self) -> Result<TaskProgress, ProducerError> {
        let snapshot = self
            .fetch(PROGRESS_KEY, |p| async move {
                Ok(Snapshot::Progress(Arc::new(p.progress.task_progress().await?)))
            })
            .await?;
        match snapshot {
            Snapshot::Progress(progress) => Ok(progress.as_ref().clone()),
            _ => Err(mismatch(PROGRESS_KEY)),
        }
    }
}
