use crate::error::GatewayError;

pub const MANIFESTS: &str = "manifests";
pub const DEFAULT_REFERENCE: &str = "latest";

/// Docker v2 manifest, Docker manifest list, OCI manifest, OCI index.
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json,\
application/vnd.docker.distribution.manifest.list.v2+json,\
application/vnd.oci.image.manifest.v1+json,\
application/vnd.oci.image.index.v1+json";
pub const BLOB_ACCEPT: &str = "application/octet-stream";

/// `/v2/` and `/v2` are registry API version checks.
pub fn is_probe(path: &str) -> bool {
    path == "/v2/" || path == "/v2"
}

/// Repository, reference and resource type named by an inbound registry path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Repository path, always namespaced (`library/alpine`).
    pub name: String,
    /// Tag or digest.
    pub reference: String,
    /// `manifests`, `blobs`, ...
    pub resource: String,
}

impl ImageRef {
    /// Accepts `/v2/<name...>/<resource>/<reference>` and the shorthand
    /// `/<name>[:<reference>]`, which always addresses a manifest.
    pub fn parse(path: &str, default_namespace: &str) -> Result<Self, GatewayError> {
        let (name, reference, resource) = if let Some(rest) = path.strip_prefix("/v2/") {
            let parts: Vec<&str> = rest.split('/').collect();
            let [name_parts @ .., resource, reference] = parts.as_slice() else {
                return Err(GatewayError::malformed_path(path));
            };
            if name_parts.is_empty() {
                return Err(GatewayError::malformed_path(path));
            }
            (name_parts.join("/"), reference.to_string(), resource.to_string())
        } else {
            let segment = path.strip_prefix('/').unwrap_or(path);
            // Only the text between the first and second colon is the reference.
            let mut pieces = segment.split(':');
            let name = pieces.next().unwrap_or_default();
            let reference = pieces
                .next()
                .filter(|reference| !reference.is_empty())
                .unwrap_or(DEFAULT_REFERENCE);
            (name.to_string(), reference.to_string(), MANIFESTS.to_string())
        };

        if name.is_empty() || reference.is_empty() || resource.is_empty() {
            return Err(GatewayError::malformed_path(path));
        }

        let name = if name.contains('/') {
            name
        } else {
            format!("{default_namespace}/{name}")
        };

        Ok(Self {
            name,
            reference,
            resource,
        })
    }

    pub fn scope(&self) -> String {
        format!("repository:{}:pull", self.name)
    }

    pub fn accept(&self) -> &'static str {
        if self.resource == MANIFESTS {
            MANIFEST_ACCEPT
        } else {
            BLOB_ACCEPT
        }
    }

    /// Path below the registry API root.
    pub fn upstream_path(&self) -> String {
        format!("{}/{}/{}", self.name, self.resource, self.reference)
    }
}
