use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use pullcache_store::{CacheStore, MemoryStore, RedbStore, StoreBackend};

use crate::config::{CacheConfig, StoreKind};

pub fn open_store(cache: &CacheConfig) -> Result<StoreBackend> {
    let store = match cache.backend {
        StoreKind::Memory => {
            StoreBackend::Memory(MemoryStore::with_max_bytes(cache.max_memory_bytes))
        }
        StoreKind::Redb => {
            if let Some(parent) = cache.path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating cache directory {}", parent.display()))?;
            }
            let store = RedbStore::open(&cache.path)
                .with_context(|| format!("opening cache store {}", cache.path.display()))?;
            StoreBackend::Redb(store)
        }
    };
    info!(backend = store.kind(), "cache store ready");
    Ok(store)
}

/// Drops expired entries once, returning how many were removed.
pub async fn purge_once<S: CacheStore>(store: &S) -> Result<u64> {
    let removed = store
        .purge_expired(Utc::now())
        .await
        .context("purging expired cache entries")?;
    if removed > 0 {
        info!(removed, "purged expired cache entries");
    }
    Ok(removed)
}

/// Starts the cron-driven purge job. Returns `None` when the schedule is empty.
pub async fn schedule_purge<S>(schedule: &str, store: Arc<S>) -> Result<Option<JobScheduler>>
where
    S: CacheStore + 'static,
{
    if schedule.trim().is_empty() {
        warn!("cache purge schedule is empty, expired entries are only dropped on lookup");
        return Ok(None);
    }

    let sched = JobScheduler::new()
        .await
        .map_err(|err| anyhow!("creating purge scheduler: {err:?}"))?;

    let job = Job::new_async(schedule, move |_uuid, _l| {
        let store = Arc::clone(&store);
        Box::pin(async move {
            if let Err(err) = purge_once(store.as_ref()).await {
                error!(error = %err, "cache purge failed");
            }
        })
    })
    .map_err(|err| anyhow!("invalid purge schedule {schedule:?}: {err:?}"))?;

    sched
        .add(job)
        .await
        .map_err(|err| anyhow!("adding purge job: {err:?}"))?;
    sched
        .start()
        .await
        .map_err(|err| anyhow!("starting purge scheduler: {err:?}"))?;
    info!(schedule, "cache purge scheduler started");
    Ok(Some(sched))
}
