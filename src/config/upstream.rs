use rama::http::Uri;
use serde::Deserialize;

/// Which upstream family the proxy fronts, and how to reach it.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UpstreamConfig {
    Maven(MavenConfig),
    Registry(RegistryConfig),
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self::Maven(MavenConfig::default())
    }
}

impl UpstreamConfig {
    pub fn family(&self) -> &'static str {
        match self {
            Self::Maven(_) => "maven",
            Self::Registry(_) => "registry",
        }
    }

    pub fn urls(&self) -> Vec<&Uri> {
        match self {
            Self::Maven(maven) => vec![&maven.url],
            Self::Registry(registry) => vec![&registry.registry_url, &registry.auth_url],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MavenConfig {
    #[serde(default = "default_maven_url", with = "serde_url")]
    pub url: Uri,
}

impl Default for MavenConfig {
    fn default() -> Self {
        Self {
            url: default_maven_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Registry API root, including the `/v2` segment.
    #[serde(default = "default_registry_url", with = "serde_url")]
    pub registry_url: Uri,
    /// Token endpoint issuing pull-scoped bearer tokens.
    #[serde(default = "default_auth_url", with = "serde_url")]
    pub auth_url: Uri,
    #[serde(default = "default_service")]
    pub service: String,
    /// Prefix for single-segment image names (`alpine` -> `library/alpine`).
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
    /// Reuse bearer tokens until shortly before they expire.
    #[serde(default)]
    pub reuse_tokens: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            auth_url: default_auth_url(),
            service: default_service(),
            default_namespace: default_namespace(),
            reuse_tokens: false,
        }
    }
}

fn default_maven_url() -> Uri {
    Uri::from_static("https://repo.maven.apache.org/maven2/")
}

fn default_registry_url() -> Uri {
    Uri::from_static("https://registry-1.docker.io/v2")
}

fn default_auth_url() -> Uri {
    Uri::from_static("https://auth.docker.io/token")
}

fn default_service() -> String {
    "registry.docker.io".to_string()
}

fn default_namespace() -> String {
    "library".to_string()
}

mod serde_url {
    use rama::http::Uri;
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Uri, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Uri::from_str(&s).map_err(serde::de::Error::custom)
    }
}
