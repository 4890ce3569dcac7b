mod embedded;
mod memory;
mod serialization;
#[cfg(test)]
mod tests;
mod types;

use std::future::Future;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub use embedded::RedbStore;
pub use memory::MemoryStore;
pub use types::{StoreStats, StoredResponse};

/// Keyed response store shared by every request the proxy handles.
///
/// Implementations must make `get` and `put` atomic per entry. Expired entries
/// are never returned from `get`; `purge_expired` reclaims their space.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<StoredResponse>>> + Send;
    fn put(&self, key: &str, entry: StoredResponse) -> impl Future<Output = Result<()>> + Send;
    fn stats(&self) -> impl Future<Output = Result<StoreStats>> + Send;
    fn purge_expired(&self, now: DateTime<Utc>) -> impl Future<Output = Result<u64>> + Send;
}

/// Runtime-selected store, chosen from configuration at startup.
#[derive(Clone)]
pub enum StoreBackend {
    Memory(MemoryStore),
    Redb(RedbStore),
}

impl StoreBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redb(_) => "redb",
        }
    }
}

impl CacheStore for StoreBackend {
    async fn get(&self, key: &str) -> Result<Option<StoredResponse>> {
        match self {
            Self::Memory(store) => store.get(key).await,
            Self::Redb(store) => store.get(key).await,
        }
    }

    async fn put(&self, key: &str, entry: StoredResponse) -> Result<()> {
        match self {
            Self::Memory(store) => store.put(key, entry).await,
            Self::Redb(store) => store.put(key, entry).await,
        }
    }

    async fn stats(&self) -> Result<StoreStats> {
        match self {
            Self::Memory(store) => store.stats().await,
            Self::Redb(store) => store.stats().await,
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        match self {
            Self::Memory(store) => store.purge_expired(now).await,
            Self::Redb(store) => store.purge_expired(now).await,
        }
    }
}
