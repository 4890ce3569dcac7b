use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, warn};

use super::CacheStore;
use super::serialization::{body_len, decode, decode_header, encode};
use super::types::{StoreStats, StoredResponse};

// key = cache key ("GET host/path?query"), value = framed StoredResponse
const RESPONSES: TableDefinition<'_, &str, &[u8]> = TableDefinition::new("responses");

/// Embedded on-disk store backed by redb.
///
/// redb transactions are blocking, so every operation runs on the blocking
/// thread pool.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("opening cache store at {}", path.display()))?;

        let write_txn = db.begin_write()?;
        {
            let _table = write_txn.open_table(RESPONSES)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for RedbStore {
    async fn get(&self, key: &str) -> Result<Option<StoredResponse>> {
        let db = self.db.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || -> Result<Option<StoredResponse>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(RESPONSES)?;
            let Some(raw) = table.get(key.as_str())? else {
                return Ok(None);
            };
            let entry = decode(raw.value())
                .with_context(|| format!("decoding cached response for {key}"))?;
            if entry.is_expired_at(Utc::now()) {
                debug!(key = %key, "cache entry expired");
                return Ok(None);
            }
            Ok(Some(entry))
        })
        .await
        .context("joining cache read task")?
    }

    async fn put(&self, key: &str, entry: StoredResponse) -> Result<()> {
        let db = self.db.clone();
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let raw = encode(&entry)?;
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(RESPONSES)?;
                table.insert(key.as_str(), raw.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .context("joining cache write task")?
    }

    async fn stats(&self) -> Result<StoreStats> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<StoreStats> {
            let now = Utc::now();
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(RESPONSES)?;

            let mut stats = StoreStats::default();
            for item in table.iter()? {
                let (_, value) = item?;
                let raw = value.value();
                stats.entries += 1;
                match decode_header(raw) {
                    Ok(entry) => {
                        stats.total_bytes += body_len(raw)?;
                        if entry.is_expired_at(now) {
                            stats.expired += 1;
                        }
                    }
                    Err(_) => stats.expired += 1,
                }
            }
            Ok(stats)
        })
        .await
        .context("joining cache stats task")?
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let write_txn = db.begin_write()?;
            let removed = {
                let mut table = write_txn.open_table(RESPONSES)?;
                let mut stale = Vec::new();
                for item in table.iter()? {
                    let (key, value) = item?;
                    match decode_header(value.value()) {
                        Ok(entry) if !entry.is_expired_at(now) => {}
                        Ok(_) => stale.push(key.value().to_string()),
                        Err(err) => {
                            warn!(key = %key.value(), error = %err, "dropping unreadable cache entry");
                            stale.push(key.value().to_string());
                        }
                    }
                }
                for key in &stale {
                    table.remove(key.as_str())?;
                }
                stale.len() as u64
            };
            write_txn.commit()?;
            Ok(removed)
        })
        .await
        .context("joining cache purge task")?
    }
}
