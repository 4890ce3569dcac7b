use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::CacheStore;
use super::types::{StoreStats, StoredResponse};

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, StoredResponse>,
    body_bytes: u64,
}

impl Entries {
    fn remove(&mut self, key: &str) -> Option<StoredResponse> {
        let entry = self.map.remove(key)?;
        self.body_bytes -= entry.size_bytes();
        Some(entry)
    }

    fn insert(&mut self, key: String, entry: StoredResponse) {
        self.body_bytes += entry.size_bytes();
        if let Some(previous) = self.map.insert(key, entry) {
            self.body_bytes -= previous.size_bytes();
        }
    }

    fn oldest_key(&self) -> Option<String> {
        self.map
            .iter()
            .min_by_key(|(_, entry)| entry.stored_at)
            .map(|(key, _)| key.clone())
    }
}

/// Process-local store. Entries vanish on restart.
///
/// With a byte limit, the oldest entries are evicted until a new body fits;
/// a body larger than the whole limit is not stored at all.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<Entries>>,
    max_bytes: Option<u64>,
}

impl MemoryStore {
    /// Unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self {
            entries: Arc::default(),
            max_bytes: Some(max_bytes),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.map.is_empty()
    }

    /// Body bytes currently held.
    pub async fn body_bytes(&self) -> u64 {
        self.entries.read().await.body_bytes
    }
}

impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredResponse>> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.map.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired_at(now) => return Ok(Some(entry.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.map.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, entry: StoredResponse) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);

        if let Some(max) = self.max_bytes {
            let size = entry.size_bytes();
            if size > max {
                debug!(key, size, max, "response larger than memory store limit, not stored");
                return Ok(());
            }
            while entries.body_bytes + size > max {
                let Some(oldest) = entries.oldest_key() else {
                    break;
                };
                debug!(key = %oldest, "evicting oldest cache entry");
                entries.remove(&oldest);
            }
        }

        entries.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut stats = StoreStats {
            total_bytes: entries.body_bytes,
            ..StoreStats::default()
        };
        for entry in entries.map.values() {
            stats.entries += 1;
            if entry.is_expired_at(now) {
                stats.expired += 1;
            }
        }
        Ok(stats)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let stale: Vec<String> = entries
            .map
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.remove(key);
        }
        Ok(stale.len() as u64)
    }
}
