use std::fmt;
use std::time::Instant;

use rama::http::{Method, Request, header};

/// How a request was answered, for the per-request log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Registry version check answered locally.
    Probe,
    Hit,
    /// Fetched upstream and stored.
    Miss,
    /// Cacheable method, but the response was relayed without storing.
    Bypass,
    /// Method that is never cached.
    Pass,
    /// Upstream answered with a non-2xx status, relayed as-is.
    UpstreamError,
    Error,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CacheStatus::Probe => "probe",
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Bypass => "bypass",
            CacheStatus::Pass => "pass",
            CacheStatus::UpstreamError => "upstream_error",
            CacheStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Request context for tracking request lifecycle
pub struct RequestContext {
    pub start: Instant,
    pub method: Method,
    pub path: String,
    pub cache: CacheStatus,
}

impl RequestContext {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            start: Instant::now(),
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            cache: CacheStatus::Pass,
        }
    }

    pub fn summary(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// `"<METHOD> <host><path>[?query]"`, shared by lookup and store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let uri = req.uri();
        let host = uri
            .authority()
            .map(|authority| authority.as_str().to_owned())
            .or_else(|| {
                req.headers()
                    .get(header::HOST)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            })
            .unwrap_or_default()
            .to_ascii_lowercase();
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        Self(format!("{} {host}{path_and_query}", req.method()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rama::http::Body;

    fn req(method: Method, uri: &str, host: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn key_uses_host_header_for_origin_form() {
        let key = CacheKey::from_request(&req(
            Method::GET,
            "/v2/library/alpine/manifests/latest",
            Some("Cache.Example.com:8346"),
        ));
        assert_eq!(
            key.as_str(),
            "GET cache.example.com:8346/v2/library/alpine/manifests/latest"
        );
    }

    #[test]
    fn key_prefers_uri_authority() {
        let key = CacheKey::from_request(&req(
            Method::GET,
            "http://proxy.local/junit/junit/maven-metadata.xml",
            Some("other.local"),
        ));
        assert_eq!(key.as_str(), "GET proxy.local/junit/junit/maven-metadata.xml");
    }

    #[test]
    fn query_string_is_part_of_key() {
        let plain = CacheKey::from_request(&req(Method::GET, "/a.jar", Some("h")));
        let queried = CacheKey::from_request(&req(Method::GET, "/a.jar?x=1", Some("h")));
        assert_ne!(plain, queried);
        assert_eq!(queried.as_str(), "GET h/a.jar?x=1");
    }

    #[test]
    fn method_is_part_of_key() {
        let get = CacheKey::from_request(&req(Method::GET, "/a.jar", Some("h")));
        let head = CacheKey::from_request(&req(Method::HEAD, "/a.jar", Some("h")));
        assert_ne!(get, head);
    }

    #[test]
    fn cache_status_labels() {
        assert_eq!(CacheStatus::Hit.to_string(), "hit");
        assert_eq!(CacheStatus::UpstreamError.to_string(), "upstream_error");
        assert_eq!(CacheStatus::Bypass.to_string(), "bypass");
    }
}
