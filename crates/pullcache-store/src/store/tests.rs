use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use tempfile::tempdir;

use super::{CacheStore, MemoryStore, RedbStore, StoreBackend, StoredResponse};

fn jar_response(ttl_secs: u64) -> StoredResponse {
    StoredResponse::new(
        200,
        vec![
            ("content-type".to_string(), "application/java-archive".to_string()),
            ("cache-control".to_string(), format!("public, max-age={ttl_secs}")),
        ],
        Bytes::from_static(b"jar-bytes"),
        ttl_secs,
    )
}

fn expired(mut entry: StoredResponse) -> StoredResponse {
    entry.stored_at = Utc::now() - TimeDelta::hours(2);
    entry.expires_at = Utc::now() - TimeDelta::hours(1);
    entry
}

// ==================== StoredResponse ====================

#[test]
fn new_entry_expires_after_ttl() {
    let entry = jar_response(60);
    assert_eq!(entry.expires_at - entry.stored_at, TimeDelta::seconds(60));
    assert!(!entry.is_expired_at(entry.stored_at));
    assert!(entry.is_expired_at(entry.expires_at));
}

#[test]
fn huge_ttl_saturates_instead_of_overflowing() {
    let entry = jar_response(u64::MAX);
    assert!(entry.expires_at > entry.stored_at);
}

#[test]
fn header_lookup_is_case_insensitive() {
    let entry = jar_response(60);
    assert_eq!(entry.header("Content-Type"), Some("application/java-archive"));
    assert_eq!(entry.header("etag"), None);
}

// ==================== MemoryStore ====================

#[tokio::test]
async fn memory_store_returns_what_was_put() {
    let store = MemoryStore::new();
    let entry = jar_response(60);
    store.put("GET repo/a.jar", entry.clone()).await.unwrap();

    assert_eq!(store.get("GET repo/a.jar").await.unwrap(), Some(entry));
    assert_eq!(store.get("GET repo/b.jar").await.unwrap(), None);
}

#[tokio::test]
async fn memory_store_hides_and_drops_expired_entries() {
    let store = MemoryStore::new();
    store
        .put("GET repo/old.jar", expired(jar_response(60)))
        .await
        .unwrap();

    assert_eq!(store.get("GET repo/old.jar").await.unwrap(), None);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn memory_store_put_overwrites() {
    let store = MemoryStore::new();
    store.put("k", jar_response(60)).await.unwrap();
    let mut newer = jar_response(120);
    newer.body = Bytes::from_static(b"newer");
    store.put("k", newer.clone()).await.unwrap();

    assert_eq!(store.len().await, 1);
    assert_eq!(store.get("k").await.unwrap().unwrap().body, newer.body);
}

#[tokio::test]
async fn memory_store_purge_and_stats() {
    let store = MemoryStore::new();
    store.put("fresh", jar_response(60)).await.unwrap();
    store.put("stale-1", expired(jar_response(60))).await.unwrap();
    store.put("stale-2", expired(jar_response(60))).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.expired, 2);
    assert_eq!(stats.total_bytes, 3 * b"jar-bytes".len() as u64);

    assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 2);
    assert_eq!(store.len().await, 1);
    assert!(store.get("fresh").await.unwrap().is_some());
}

fn sized(len: usize, age_secs: i64) -> StoredResponse {
    let mut entry = StoredResponse::new(200, Vec::new(), Bytes::from(vec![b'x'; len]), 600);
    entry.stored_at = Utc::now() - TimeDelta::seconds(age_secs);
    entry
}

#[tokio::test]
async fn bounded_memory_store_evicts_oldest_entries() {
    let store = MemoryStore::with_max_bytes(10);
    store.put("oldest", sized(4, 30)).await.unwrap();
    store.put("middle", sized(4, 20)).await.unwrap();
    store.put("newest", sized(4, 10)).await.unwrap();

    assert_eq!(store.len().await, 2);
    assert!(store.body_bytes().await <= 10);
    assert!(store.get("oldest").await.unwrap().is_none());
    assert!(store.get("middle").await.unwrap().is_some());
    assert!(store.get("newest").await.unwrap().is_some());
}

#[tokio::test]
async fn bounded_memory_store_skips_bodies_larger_than_limit() {
    let store = MemoryStore::with_max_bytes(10);
    store.put("small", sized(4, 10)).await.unwrap();
    store.put("huge", sized(11, 0)).await.unwrap();

    assert!(store.get("huge").await.unwrap().is_none());
    assert!(store.get("small").await.unwrap().is_some());
    assert_eq!(store.body_bytes().await, 4);
}

#[tokio::test]
async fn bounded_memory_store_overwrite_releases_previous_body() {
    let store = MemoryStore::with_max_bytes(10);
    store.put("k", sized(8, 10)).await.unwrap();
    store.put("k", sized(9, 0)).await.unwrap();

    assert_eq!(store.len().await, 1);
    assert_eq!(store.body_bytes().await, 9);
    assert_eq!(store.stats().await.unwrap().total_bytes, 9);
}

#[tokio::test]
async fn purge_releases_body_bytes() {
    let store = MemoryStore::new();
    store.put("stale", expired(jar_response(60))).await.unwrap();
    assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
    assert_eq!(store.body_bytes().await, 0);
}

// ==================== RedbStore ====================

#[tokio::test]
async fn redb_store_round_trips_entries() {
    let dir = tempdir().unwrap();
    let store = RedbStore::open(&dir.path().join("cache.redb")).unwrap();
    let entry = jar_response(60);

    store.put("GET repo/a.jar", entry.clone()).await.unwrap();
    assert_eq!(store.get("GET repo/a.jar").await.unwrap(), Some(entry));
    assert_eq!(store.get("GET repo/missing.jar").await.unwrap(), None);
}

#[tokio::test]
async fn redb_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.redb");
    let entry = jar_response(60);
    {
        let store = RedbStore::open(&path).unwrap();
        store.put("GET repo/a.jar", entry.clone()).await.unwrap();
    }

    let reopened = RedbStore::open(&path).unwrap();
    assert_eq!(reopened.path(), path.as_path());
    assert_eq!(reopened.get("GET repo/a.jar").await.unwrap(), Some(entry));
}

#[tokio::test]
async fn redb_store_purges_expired_entries() {
    let dir = tempdir().unwrap();
    let store = RedbStore::open(&dir.path().join("cache.redb")).unwrap();
    store.put("fresh", jar_response(60)).await.unwrap();
    store.put("stale", expired(jar_response(60))).await.unwrap();

    assert_eq!(store.get("stale").await.unwrap(), None);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.expired, 1);

    assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
    assert_eq!(store.stats().await.unwrap().entries, 1);
}

#[tokio::test]
async fn backends_report_body_bytes_alike() {
    let dir = tempdir().unwrap();
    let redb = RedbStore::open(&dir.path().join("cache.redb")).unwrap();
    let memory = MemoryStore::new();
    for key in ["a", "b"] {
        redb.put(key, jar_response(60)).await.unwrap();
        memory.put(key, jar_response(60)).await.unwrap();
    }

    let expected = 2 * b"jar-bytes".len() as u64;
    assert_eq!(redb.stats().await.unwrap().total_bytes, expected);
    assert_eq!(memory.stats().await.unwrap().total_bytes, expected);
}

// ==================== StoreBackend ====================

#[tokio::test]
async fn backend_dispatches_to_selected_store() {
    let backend = StoreBackend::Memory(MemoryStore::new());
    assert_eq!(backend.kind(), "memory");

    backend.put("k", jar_response(60)).await.unwrap();
    assert!(backend.get("k").await.unwrap().is_some());
    assert_eq!(backend.stats().await.unwrap().entries, 1);
}
