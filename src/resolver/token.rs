use std::{collections::HashMap, str::FromStr};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rama::http::{
    Body, Method, Request, Uri, body::util::BodyExt, header,
};
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use crate::error::GatewayError;
use crate::upstream::Transport;

/// Lifetime assumed when the issuer omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 60;
/// Cached tokens closer than this to expiry are fetched again.
const REFRESH_MARGIN_SECS: i64 = 10;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Obtains pull-scoped bearer tokens from a registry token service.
#[derive(Debug)]
pub struct TokenIssuer {
    auth_url: Uri,
    service: String,
    cache: Option<TokenCache>,
}

impl TokenIssuer {
    pub fn new(auth_url: Uri, service: impl Into<String>, reuse_tokens: bool) -> Self {
        Self {
            auth_url,
            service: service.into(),
            cache: reuse_tokens.then(TokenCache::default),
        }
    }

    pub fn token_url(&self, scope: &str) -> Result<Uri, GatewayError> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("service", &self.service)
            .append_pair("scope", scope)
            .finish();
        let base = self.auth_url.to_string();
        let separator = if base.contains('?') { '&' } else { '?' };
        Uri::from_str(&format!("{base}{separator}{query}"))
            .map_err(|err| GatewayError::AuthFailure(format!("invalid token url: {err}")))
    }

    pub async fn bearer<T: Transport>(
        &self,
        transport: &T,
        scope: &str,
    ) -> Result<String, GatewayError> {
        if let Some(cache) = &self.cache
            && let Some(token) = cache.get(scope, Utc::now())
        {
            debug!(scope, "reusing cached auth token");
            return Ok(token);
        }

        let url = self.token_url(scope)?;
        debug!(auth_url = %url, "requesting auth token");

        let request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .map_err(|err| GatewayError::AuthFailure(format!("building token request: {err}")))?;

        let response = transport
            .send(request)
            .await
            .map_err(|err| GatewayError::AuthFailure(err.to_string()))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| GatewayError::AuthFailure(format!("reading token response: {err}")))?
            .to_bytes();

        if !status.is_success() {
            return Err(GatewayError::AuthFailure(format!(
                "Auth response status: {}, body: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )));
        }

        let parsed: TokenResponse = serde_json::from_slice(&body).map_err(|err| {
            GatewayError::AuthFailure(format!("malformed token response: {err}"))
        })?;
        let expires_in = parsed.expires_in;
        let token = parsed
            .token
            .or(parsed.access_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                GatewayError::AuthFailure("token response did not include a token".to_string())
            })?;

        debug!(scope, expires_in, "received auth token");
        if let Some(cache) = &self.cache {
            cache.insert(scope, token.clone(), expires_in, Utc::now());
        }
        Ok(token)
    }
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Bearer tokens keyed by scope, reused until shortly before expiry.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    pub fn get(&self, scope: &str, now: DateTime<Utc>) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(scope) {
            Some(cached)
                if cached.expires_at.signed_duration_since(now)
                    > TimeDelta::seconds(REFRESH_MARGIN_SECS) =>
            {
                Some(cached.token.clone())
            }
            Some(_) => {
                entries.remove(scope);
                None
            }
            None => None,
        }
    }

    pub fn insert(
        &self,
        scope: &str,
        token: String,
        expires_in: Option<u64>,
        now: DateTime<Utc>,
    ) {
        let lifetime = expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::seconds(DEFAULT_TOKEN_LIFETIME_SECS));
        let expires_at = now
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .lock()
            .insert(scope.to_owned(), CachedToken { token, expires_at });
    }
}
