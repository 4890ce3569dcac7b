//! Turns an inbound request into the request sent upstream.
//!
//! The strategy comes from configuration, never from the shape of the inbound URL.

pub mod image;
pub mod token;

use std::str::FromStr;

use anyhow::{Context, Result};
use rama::http::{Body, HeaderMap, HeaderValue, Method, Request, Uri, header};
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::GatewayError;
use crate::upstream::{Transport, UA};

use self::image::ImageRef;
use self::token::TokenIssuer;

/// Where and how to fetch the upstream resource for one request.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub method: Method,
    pub url: Uri,
    pub headers: HeaderMap,
    /// Whether the inbound body travels upstream.
    pub forward_body: bool,
}

impl ResolvedTarget {
    pub fn into_request(self, body: Body) -> Result<Request<Body>, GatewayError> {
        let body = if self.forward_body { body } else { Body::empty() };
        let mut request = Request::builder()
            .method(self.method)
            .uri(self.url)
            .body(body)
            .map_err(|err| GatewayError::Internal(err.to_string()))?;
        *request.headers_mut() = self.headers;
        Ok(request)
    }
}

/// Maven family: inbound credentials and path go upstream untouched.
#[derive(Debug)]
pub struct Passthrough {
    base: Uri,
}

/// Registry family: every fetch is preceded by a bearer token handshake.
#[derive(Debug)]
pub struct TokenExchange {
    registry_url: Uri,
    default_namespace: String,
    issuer: TokenIssuer,
}

#[derive(Debug)]
pub enum Resolver {
    Passthrough(Passthrough),
    TokenExchange(TokenExchange),
}

impl Resolver {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        match config {
            UpstreamConfig::Maven(maven) => Self::Passthrough(Passthrough {
                base: maven.url.clone(),
            }),
            UpstreamConfig::Registry(registry) => Self::TokenExchange(TokenExchange {
                registry_url: registry.registry_url.clone(),
                default_namespace: registry.default_namespace.clone(),
                issuer: TokenIssuer::new(
                    registry.auth_url.clone(),
                    registry.service.clone(),
                    registry.reuse_tokens,
                ),
            }),
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            Self::Passthrough(_) => "maven",
            Self::TokenExchange(_) => "registry",
        }
    }

    /// Registry version checks are answered locally; Maven has none.
    pub fn is_probe(&self, path: &str) -> bool {
        matches!(self, Self::TokenExchange(_)) && image::is_probe(path)
    }

    /// Only the request head is read; the body stays with the caller.
    pub async fn resolve<B, T: Transport>(
        &self,
        req: &Request<B>,
        transport: &T,
    ) -> Result<ResolvedTarget, GatewayError> {
        match self {
            Self::Passthrough(passthrough) => passthrough.resolve(req),
            Self::TokenExchange(exchange) => exchange.resolve(req, transport).await,
        }
    }

    /// Error for a failed upstream fetch or body read.
    pub fn transport_failure(&self, err: impl std::fmt::Display) -> GatewayError {
        match self {
            Self::Passthrough(_) => GatewayError::UpstreamUnreachable(err.to_string()),
            Self::TokenExchange(_) => GatewayError::RelayFailure(err.to_string()),
        }
    }
}

impl Passthrough {
    fn resolve<B>(&self, req: &Request<B>) -> Result<ResolvedTarget, GatewayError> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = join(&self.base, path_and_query)?;

        let inbound = req.headers();
        let mut headers = HeaderMap::new();
        if let Some(auth) = inbound.get(header::AUTHORIZATION) {
            headers.insert(header::AUTHORIZATION, auth.clone());
        }
        let agent = inbound
            .get(header::USER_AGENT)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(UA));
        headers.insert(header::USER_AGENT, agent);

        let method = req.method().clone();
        let forward_body = method != Method::GET && method != Method::HEAD;
        if forward_body {
            for name in [header::CONTENT_TYPE, header::CONTENT_LENGTH] {
                if let Some(value) = inbound.get(&name) {
                    headers.insert(name, value.clone());
                }
            }
        }

        debug!(%method, upstream = %url, "forwarding to maven repository");
        Ok(ResolvedTarget {
            method,
            url,
            headers,
            forward_body,
        })
    }
}

impl TokenExchange {
    async fn resolve<B, T: Transport>(
        &self,
        req: &Request<B>,
        transport: &T,
    ) -> Result<ResolvedTarget, GatewayError> {
        let image = ImageRef::parse(req.uri().path(), &self.default_namespace)?;
        debug!(
            name = %image.name,
            reference = %image.reference,
            resource = %image.resource,
            "parsed image reference"
        );

        let token = self.issuer.bearer(transport, &image.scope()).await?;

        let base = self.registry_url.to_string();
        let raw = format!("{}/{}", base.trim_end_matches('/'), image.upstream_path());
        let url = Uri::from_str(&raw).map_err(|_| GatewayError::malformed_path(req.uri().path()))?;

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| GatewayError::AuthFailure(format!("unusable token: {err}")))?;
        headers.insert(header::AUTHORIZATION, bearer);
        headers.insert(header::ACCEPT, HeaderValue::from_static(image.accept()));
        headers.insert(header::USER_AGENT, HeaderValue::from_static(UA));

        let method = if req.method() == Method::HEAD {
            Method::HEAD
        } else {
            Method::GET
        };

        debug!(%method, upstream = %url, "forwarding to registry");
        Ok(ResolvedTarget {
            method,
            url,
            headers,
            forward_body: false,
        })
    }
}

/// Appends an inbound path and query to a base URL, collapsing the slash between them.
pub fn join(base: &Uri, path_and_query: &str) -> Result<Uri, GatewayError> {
    join_uri(base, path_and_query).map_err(|err| GatewayError::Internal(format!("{err:#}")))
}

fn join_uri(base: &Uri, path_and_query: &str) -> Result<Uri> {
    let base_path = base
        .path_and_query()
        .map(|pq| pq.path())
        .unwrap_or("/")
        .trim_end_matches('/');

    let (path, query) = match path_and_query.find('?') {
        Some(idx) => path_and_query.split_at(idx),
        None => (path_and_query, ""),
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    let full_path = format!("{base_path}{path}{query}");

    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(
        full_path
            .parse()
            .with_context(|| format!("parse combined path '{full_path}'"))?,
    );

    Uri::from_parts(parts).with_context(|| format!("joining upstream path {path_and_query}"))
}
