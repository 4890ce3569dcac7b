use rama::http::{Body, Response, StatusCode};
use serde_json::json;

use pullcache_store::CacheStore;

use super::response::respond_json;
use super::types::CacheStatus;
use crate::error::GatewayError;

/// Handles health check requests
pub async fn handle_health<S: CacheStore>(
    store: &S,
    family: &str,
) -> Result<(Response<Body>, CacheStatus), GatewayError> {
    let (ok, check) = match store.stats().await {
        Ok(stats) => (
            true,
            json!({
                "component": "cache_store",
                "status": "ok",
                "entries": stats.entries,
                "expired": stats.expired,
                "total_bytes": stats.total_bytes,
            }),
        ),
        Err(err) => (
            false,
            json!({
                "component": "cache_store",
                "status": "error",
                "error": err.to_string(),
            }),
        ),
    };

    let body = json!({
        "status": if ok { "ok" } else { "degraded" },
        "family": family,
        "checks": [check],
    });

    let (status, cache) = if ok {
        (StatusCode::OK, CacheStatus::Pass)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, CacheStatus::Error)
    };
    Ok((respond_json(status, &body.to_string())?, cache))
}
