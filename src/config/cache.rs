use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 30 days.
pub const DEFAULT_TTL_SECS: u64 = 2_592_000;
/// 128 MiB, the largest body buffered for storage.
pub const DEFAULT_MAX_CACHEABLE_BYTES: u64 = 128 * 1024 * 1024;
/// 1 GiB of response bodies held by the `memory` backend.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Redb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of stored responses, also advertised as `max-age`.
    #[serde(default = "CacheConfig::default_ttl_secs")]
    pub ttl_secs: u64,
    /// Responses declaring this many bytes or more are relayed but not stored.
    #[serde(default = "CacheConfig::default_max_cacheable_bytes")]
    pub max_cacheable_bytes: u64,
    #[serde(default)]
    pub backend: StoreKind,
    /// Body bytes the `memory` backend keeps before evicting its oldest entries.
    #[serde(default = "CacheConfig::default_max_memory_bytes")]
    pub max_memory_bytes: u64,
    /// redb file, only used by the `redb` backend.
    #[serde(default = "CacheConfig::default_path")]
    pub path: PathBuf,
    /// Cron expression (with seconds) for evicting expired entries. Empty disables.
    #[serde(default = "CacheConfig::default_purge_schedule")]
    pub purge_schedule: String,
}

impl CacheConfig {
    fn default_ttl_secs() -> u64 {
        DEFAULT_TTL_SECS
    }

    fn default_max_cacheable_bytes() -> u64 {
        DEFAULT_MAX_CACHEABLE_BYTES
    }

    fn default_max_memory_bytes() -> u64 {
        DEFAULT_MAX_MEMORY_BYTES
    }

    fn default_path() -> PathBuf {
        PathBuf::from("./pullcache.redb")
    }

    fn default_purge_schedule() -> String {
        "0 */10 * * * *".to_string()
    }

    pub fn normalize_paths(&mut self, base_dir: &Path) {
        if self.path.is_relative() {
            self.path = base_dir.join(&self.path);
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: Self::default_ttl_secs(),
            max_cacheable_bytes: Self::default_max_cacheable_bytes(),
            backend: StoreKind::default(),
            max_memory_bytes: Self::default_max_memory_bytes(),
            path: Self::default_path(),
            purge_schedule: Self::default_purge_schedule(),
        }
    }
}
