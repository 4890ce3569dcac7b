mod cache;
mod handlers;
mod response;
mod types;

use std::sync::Arc;

use rama::{
    Service,
    error::BoxError,
    http::{Body, Method, Request, Response},
};
use tracing::{debug, info, warn};

use pullcache_store::CacheStore;

use crate::{
    config::Config,
    error::GatewayError,
    resolver::Resolver,
    upstream::{Transport, send_following_redirects},
};

pub use cache::{CachePolicy, SkipReason};
pub use types::{CacheKey, CacheStatus, RequestContext};

/// Liveness and store statistics, answered for either upstream family.
pub const HEALTH_PATH: &str = "/_pullcache/up";

/// Caching proxy in front of one upstream repository.
pub struct PullCache<S, T> {
    config: Arc<Config>,
    resolver: Arc<Resolver>,
    store: Arc<S>,
    transport: Arc<T>,
}

impl<S, T> Clone for PullCache<S, T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            resolver: Arc::clone(&self.resolver),
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<S: CacheStore, T: Transport> PullCache<S, T> {
    pub fn new(config: Arc<Config>, store: Arc<S>, transport: Arc<T>) -> Self {
        let resolver = Arc::new(Resolver::from_config(&config.upstream));
        Self {
            config,
            resolver,
            store,
            transport,
        }
    }

    async fn handle(
        &self,
        req: Request<Body>,
        ctx: &mut RequestContext,
    ) -> Result<Response<Body>, GatewayError> {
        let path = req.uri().path();

        if req.method() == Method::GET && path == HEALTH_PATH {
            let (resp, status) =
                handlers::handle_health(self.store.as_ref(), self.resolver.family()).await?;
            ctx.cache = status;
            return Ok(resp);
        }

        if self.resolver.is_probe(path) {
            ctx.cache = CacheStatus::Probe;
            return Ok(response::respond_probe()?);
        }

        let (parts, body) = req.into_parts();
        let head = Request::from_parts(parts, ());
        let method = head.method().clone();
        let key = CacheKey::from_request(&head);

        if method == Method::GET {
            match self.store.get(key.as_str()).await {
                Ok(Some(entry)) => {
                    ctx.cache = CacheStatus::Hit;
                    return cache::to_response(&entry);
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, %key, "cache read failed, treating as miss"),
            }
        }

        let target = self
            .resolver
            .resolve(&head, self.transport.as_ref())
            .await?;
        let upstream_req = target.into_request(body)?;

        let upstream = send_following_redirects(self.transport.as_ref(), upstream_req)
            .await
            .map_err(|err| self.resolver.transport_failure(err))?;

        let status = upstream.status();
        if !status.is_success() {
            warn!(
                summary = %ctx.summary(),
                upstream_status = status.as_u16(),
                "upstream returned error status"
            );
            ctx.cache = CacheStatus::UpstreamError;
            return response::relay_error(upstream)
                .await
                .map_err(|err| self.resolver.transport_failure(err));
        }

        let max_bytes = self.config.cache.max_cacheable_bytes;
        match cache::decide(&method, status, upstream.headers(), max_bytes) {
            CachePolicy::Cacheable { declared_len } => {
                let entry = cache::buffer_for_store(upstream, self.config.cache.ttl_secs)
                    .await
                    .map_err(|err| self.resolver.transport_failure(err))?;
                let resp = cache::to_response(&entry)?;
                debug!(%key, declared_len, "storing response");
                if let Err(err) = self.store.put(key.as_str(), entry).await {
                    warn!(error = %err, %key, "cache write failed");
                }
                ctx.cache = CacheStatus::Miss;
                Ok(resp)
            }
            CachePolicy::NonCacheable(reason) => {
                debug!(%key, %reason, "relaying without storing");
                ctx.cache = if method == Method::GET {
                    CacheStatus::Bypass
                } else {
                    CacheStatus::Pass
                };
                Ok(response::relay(upstream))
            }
        }
    }
}

impl<S, T> Service<Request<Body>> for PullCache<S, T>
where
    S: CacheStore + 'static,
    T: Transport,
{
    type Output = Response<Body>;
    type Error = BoxError;

    async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let mut ctx = RequestContext::from_request(&req);

        let response = match self.handle(req, &mut ctx).await {
            Ok(resp) => resp,
            Err(err) => {
                ctx.cache = CacheStatus::Error;
                warn!(
                    summary = %ctx.summary(),
                    kind = err.kind(),
                    error = %err,
                    "request failed"
                );
                err.into_response()
            }
        };

        info!(
            summary = %ctx.summary(),
            response_code = response.status().as_u16(),
            duration_ms = ctx.start.elapsed().as_millis() as u64,
            cache_status = %ctx.cache,
            "request handled"
        );

        Ok(response)
    }
}
