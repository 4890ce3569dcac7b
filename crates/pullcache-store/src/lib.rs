mod store;

pub use store::{
    CacheStore, MemoryStore, RedbStore, StoreBackend, StoreStats, StoredResponse,
};
