use std::{future::Future, str::FromStr};

use anyhow::{Context, Result, anyhow, bail};
use rama::{
    Service,
    http::{
        Body, Method, Request, Response, StatusCode, Uri,
        client::EasyHttpWebClient,
        header::{self, HeaderValue, USER_AGENT},
        layer::trace::TraceLayer,
    },
    layer::Layer,
};
use tracing::debug;

pub const UA: &str = concat!("pullcache/", env!("CARGO_PKG_VERSION"));

/// Redirect hops followed before a fetch is abandoned.
pub const MAX_REDIRECTS: usize = 10;

/// Sends one request upstream and hands back the response with its body unread.
///
/// Failures are transport-level only; any HTTP status, including 5xx, is `Ok`.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: Request<Body>) -> impl Future<Output = Result<Response<Body>>> + Send;
}

/// Rama-based upstream HTTP client. No retries: every failure is final for the request.
#[derive(Debug, Clone, Default)]
pub struct UpstreamClient;

impl UpstreamClient {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for UpstreamClient {
    async fn send(&self, mut request: Request<Body>) -> Result<Response<Body>> {
        if !request.headers().contains_key(USER_AGENT) {
            request
                .headers_mut()
                .insert(USER_AGENT, HeaderValue::from_static(UA));
        }

        let method = request.method().clone();
        let uri = request.uri().clone();
        let client = (TraceLayer::new_for_http(),).into_layer(EasyHttpWebClient::default());

        let response = client
            .serve(request)
            .await
            .map_err(|err| anyhow!("{method} {uri} failed: {err}"))?;

        debug!(%method, %uri, status = %response.status(), "upstream responded");
        Ok(response)
    }
}

/// Sends `request` and follows redirects up to [`MAX_REDIRECTS`] hops.
///
/// GET and HEAD are re-issued as-is for any redirect status. Other methods are
/// only followed on `303 See Other`, which turns them into a body-less GET;
/// otherwise their redirect response is returned untouched. `Authorization` is
/// dropped once a hop leaves the original scheme and authority.
pub async fn send_following_redirects<T: Transport>(
    transport: &T,
    request: Request<Body>,
) -> Result<Response<Body>> {
    let mut method = request.method().clone();
    let mut uri = request.uri().clone();
    let mut headers = request.headers().clone();
    let mut response = transport.send(request).await?;
    let mut hops = 0;

    loop {
        let Some(location) = redirect_location(&response) else {
            return Ok(response);
        };

        if method != Method::GET && method != Method::HEAD {
            if response.status() != StatusCode::SEE_OTHER {
                return Ok(response);
            }
            method = Method::GET;
            headers.remove(header::CONTENT_TYPE);
            headers.remove(header::CONTENT_LENGTH);
        }

        if hops == MAX_REDIRECTS {
            bail!("{method} {uri} exceeded {MAX_REDIRECTS} redirects");
        }
        hops += 1;

        let next = resolve_location(&uri, &location)?;
        if next.scheme() != uri.scheme() || next.authority() != uri.authority() {
            headers.remove(header::AUTHORIZATION);
        }
        debug!(from = %uri, to = %next, status = response.status().as_u16(), "following redirect");
        uri = next;

        let mut next_request = Request::builder()
            .method(method.clone())
            .uri(uri.clone())
            .body(Body::empty())
            .context("building redirected request")?;
        *next_request.headers_mut() = headers.clone();
        response = transport.send(next_request).await?;
    }
}

fn redirect_location(response: &Response<Body>) -> Option<String> {
    if !matches!(
        response.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Resolves a `Location` value, absolute or relative, against the current URL.
fn resolve_location(current: &Uri, location: &str) -> Result<Uri> {
    let base = url::Url::parse(&current.to_string())
        .with_context(|| format!("parsing request url {current}"))?;
    let next = base
        .join(location)
        .with_context(|| format!("resolving redirect location {location:?}"))?;
    Uri::from_str(next.as_str()).with_context(|| format!("redirect target {next}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Answers from a fixed script keyed by URL, recording what it was sent.
    struct Script {
        routes: Vec<(&'static str, StatusCode, Option<&'static str>)>,
        seen: Mutex<Vec<(Method, String, Option<String>)>>,
    }

    impl Script {
        fn new(routes: Vec<(&'static str, StatusCode, Option<&'static str>)>) -> Self {
            Self {
                routes,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for Script {
        async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
            let url = request.uri().to_string();
            let auth = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            self.seen
                .lock()
                .push((request.method().clone(), url.clone(), auth));

            let (_, status, location) = self
                .routes
                .iter()
                .find(|(route, _, _)| *route == url)
                .ok_or_else(|| anyhow!("unscripted url {url}"))?;
            let mut builder = Response::builder().status(*status);
            if let Some(location) = location {
                builder = builder.header(header::LOCATION, *location);
            }
            Ok(builder.body(Body::from("done"))?)
        }
    }

    fn get(url: &str) -> Request<Body> {
        Request::builder()
            .uri(url)
            .header(header::AUTHORIZATION, "Bearer tok")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn cross_origin_redirect_drops_authorization() {
        let script = Script::new(vec![
            (
                "https://registry-1.docker.io/v2/library/alpine/blobs/sha256:abc",
                StatusCode::TEMPORARY_REDIRECT,
                Some("https://cdn.example.net/blob?sig=1"),
            ),
            ("https://cdn.example.net/blob?sig=1", StatusCode::OK, None),
        ]);

        let response = send_following_redirects(
            &script,
            get("https://registry-1.docker.io/v2/library/alpine/blobs/sha256:abc"),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let seen = script.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].2.as_deref(), Some("Bearer tok"));
        assert_eq!(seen[1].1, "https://cdn.example.net/blob?sig=1");
        assert_eq!(seen[1].2, None);
    }

    #[tokio::test]
    async fn same_origin_relative_redirect_keeps_authorization() {
        let script = Script::new(vec![
            (
                "https://repo.example.com/maven2/a.jar",
                StatusCode::MOVED_PERMANENTLY,
                Some("/mirror/a.jar"),
            ),
            ("https://repo.example.com/mirror/a.jar", StatusCode::OK, None),
        ]);

        let response = send_following_redirects(&script, get("https://repo.example.com/maven2/a.jar"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let seen = script.seen.lock();
        assert_eq!(seen[1].1, "https://repo.example.com/mirror/a.jar");
        assert_eq!(seen[1].2.as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn redirect_loop_is_bounded() {
        let script = Script::new(vec![(
            "https://repo.example.com/loop",
            StatusCode::FOUND,
            Some("https://repo.example.com/loop"),
        )]);

        let err = send_following_redirects(&script, get("https://repo.example.com/loop"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("redirects"));
        assert_eq!(script.seen.lock().len(), MAX_REDIRECTS + 1);
    }

    #[tokio::test]
    async fn put_redirect_is_returned_unfollowed() {
        let script = Script::new(vec![(
            "https://repo.example.com/a.pom",
            StatusCode::TEMPORARY_REDIRECT,
            Some("https://elsewhere.example.com/a.pom"),
        )]);
        let request = Request::builder()
            .method(Method::PUT)
            .uri("https://repo.example.com/a.pom")
            .body(Body::from("<project/>"))
            .unwrap();

        let response = send_following_redirects(&script, request).await.unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(script.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn see_other_turns_post_into_get() {
        let script = Script::new(vec![
            (
                "https://repo.example.com/upload",
                StatusCode::SEE_OTHER,
                Some("/result"),
            ),
            ("https://repo.example.com/result", StatusCode::OK, None),
        ]);
        let request = Request::builder()
            .method(Method::POST)
            .uri("https://repo.example.com/upload")
            .body(Body::from("payload"))
            .unwrap();

        let response = send_following_redirects(&script, request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(script.seen.lock()[1].0, Method::GET);
    }

    #[tokio::test]
    async fn redirect_without_location_is_returned() {
        let script = Script::new(vec![("https://repo.example.com/a", StatusCode::FOUND, None)]);
        let response = send_following_redirects(&script, get("https://repo.example.com/a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }
}
