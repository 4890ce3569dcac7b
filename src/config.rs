use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result, bail};
use rama::http::Uri;
use serde::Deserialize;

pub mod cache;
pub mod logging;
pub mod server;
pub mod upstream;


pub use cache::{CacheConfig, StoreKind};
pub use logging::LoggingConfig;
pub use server::ServerConfig;
pub use upstream::{MavenConfig, RegistryConfig, UpstreamConfig};

pub const DEFAULT_CONFIG_FILE: &str = "pullcache.toml";

/// Upstream base URL override for the Maven family.
pub const ENV_MAVEN_REPO_URL: &str = "MAVEN_REPO_URL";
/// Cache TTL override in seconds.
pub const ENV_CACHE_TTL: &str = "CACHE_TTL";
/// Older spelling of [`ENV_CACHE_TTL`]; consulted only when that one is unset.
pub const ENV_CACHE_TIME: &str = "CACHE_TIME";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let candidate = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if candidate.exists() {
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read config {}", candidate.display()))?;
            let mut config: Config = toml::from_str(&raw)
                .with_context(|| format!("invalid config {}", candidate.display()))?;
            config
                .cache
                .normalize_paths(candidate.parent().unwrap_or(Path::new(".")));
            Ok(config)
        } else {
            tracing::warn!(
                path = %candidate.display(),
                "configuration file not found, using defaults"
            );
            let mut config = Config::default();
            let cwd = std::env::current_dir().context("reading current directory")?;
            config.cache.normalize_paths(&cwd);
            Ok(config)
        }
    }

    /// Applies the process environment on top of the file settings.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = var(ENV_MAVEN_REPO_URL) {
            match &mut self.upstream {
                UpstreamConfig::Maven(maven) => {
                    maven.url = Uri::from_str(raw.trim())
                        .with_context(|| format!("invalid {ENV_MAVEN_REPO_URL} value {raw:?}"))?;
                }
                UpstreamConfig::Registry(_) => {
                    tracing::warn!("{ENV_MAVEN_REPO_URL} is ignored for a registry upstream");
                }
            }
        }

        let ttl = var(ENV_CACHE_TTL)
            .map(|raw| (ENV_CACHE_TTL, raw))
            .or_else(|| var(ENV_CACHE_TIME).map(|raw| (ENV_CACHE_TIME, raw)));
        if let Some((name, raw)) = ttl {
            self.cache.ttl_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {name} value {raw:?}"))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for url in self.upstream.urls() {
            if !matches!(url.scheme_str(), Some("http" | "https")) {
                bail!("unsupported upstream scheme {url}");
            }
            if url.host().is_none() {
                bail!("upstream url {url} has no host");
            }
        }
        if self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be greater than zero");
        }
        if self.cache.max_cacheable_bytes == 0 {
            bail!("cache.max_cacheable_bytes must be greater than zero");
        }
        if self.cache.backend == StoreKind::Memory && self.cache.max_memory_bytes == 0 {
            bail!("cache.max_memory_bytes must be greater than zero");
        }
        Ok(())
    }
}
