use std::fmt;

use anyhow::{Result, anyhow};
use rama::http::{
    Body, HeaderMap, HeaderName, Method, Response, StatusCode, body::util::BodyExt, header,
};
use tracing::debug;

use pullcache_store::StoredResponse;

use crate::error::GatewayError;

/// Whether a successful upstream response may be written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Cacheable { declared_len: u64 },
    NonCacheable(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Method,
    Status(u16),
    UnknownLength,
    TooLarge { declared_len: u64, max: u64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Method => f.write_str("method is not cacheable"),
            SkipReason::Status(code) => write!(f, "status {code} is not cacheable"),
            SkipReason::UnknownLength => f.write_str("no content-length"),
            SkipReason::TooLarge { declared_len, max } => {
                write!(f, "content-length {declared_len} exceeds limit {max}")
            }
        }
    }
}

pub fn decide(method: &Method, status: StatusCode, headers: &HeaderMap, max_bytes: u64) -> CachePolicy {
    if method != Method::GET {
        return CachePolicy::NonCacheable(SkipReason::Method);
    }
    if !status.is_success() || status == StatusCode::PARTIAL_CONTENT {
        return CachePolicy::NonCacheable(SkipReason::Status(status.as_u16()));
    }

    let Some(declared_len) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
    else {
        return CachePolicy::NonCacheable(SkipReason::UnknownLength);
    };

    if declared_len >= max_bytes {
        return CachePolicy::NonCacheable(SkipReason::TooLarge {
            declared_len,
            max: max_bytes,
        });
    }

    CachePolicy::Cacheable { declared_len }
}

/// Headers describing a single connection, never relayed or stored.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::TRANSFER_ENCODING || name == header::CONNECTION || name.as_str() == "keep-alive"
}

/// Reads the whole body and builds the entry served now and on later hits.
pub async fn buffer_for_store(response: Response<Body>, ttl_secs: u64) -> Result<StoredResponse> {
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|err| anyhow!("reading upstream body: {err}"))?
        .to_bytes();

    let mut headers = Vec::with_capacity(parts.headers.len() + 2);
    for (name, value) in &parts.headers {
        if is_hop_by_hop(name) || name == header::CACHE_CONTROL || name == header::CONTENT_LENGTH {
            continue;
        }
        match value.to_str() {
            Ok(value) => headers.push((name.as_str().to_owned(), value.to_owned())),
            Err(_) => debug!(header = %name, "skipping non-text header"),
        }
    }
    headers.push((
        header::CACHE_CONTROL.as_str().to_owned(),
        format!("public, max-age={ttl_secs}"),
    ));
    headers.push((
        header::CONTENT_LENGTH.as_str().to_owned(),
        body.len().to_string(),
    ));

    Ok(StoredResponse::new(parts.status.as_u16(), headers, body, ttl_secs))
}

pub fn to_response(entry: &StoredResponse) -> Result<Response<Body>, GatewayError> {
    let status = StatusCode::from_u16(entry.status)
        .map_err(|err| GatewayError::Internal(format!("stored status {}: {err}", entry.status)))?;
    let mut builder = Response::builder().status(status);
    for (name, value) in &entry.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(entry.body.clone()))
        .map_err(|err| GatewayError::Internal(err.to_string()))
}
