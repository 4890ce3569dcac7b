use rama::http::{Body, Response, StatusCode, header};
use thiserror::Error;

/// Failures that end a request with a locally produced response.
///
/// An upstream answering with its own error status is not one of these: that
/// response is relayed as-is.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid request path: Invalid image name or reference: {path}")]
    MalformedPath { path: String },

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Error fetching from Maven repository: {0}")]
    UpstreamUnreachable(String),

    #[error("Failed to proxy request: {0}")]
    RelayFailure(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn malformed_path(path: impl Into<String>) -> Self {
        Self::MalformedPath { path: path.into() }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedPath { .. } => StatusCode::BAD_REQUEST,
            Self::AuthFailure(_) => StatusCode::UNAUTHORIZED,
            Self::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::RelayFailure(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPath { .. } => "malformed_path",
            Self::AuthFailure(_) => "auth_failure",
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::RelayFailure(_) => "relay_failure",
            Self::Internal(_) => "internal",
        }
    }

    /// Plain-text response carrying only the message.
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.to_string()));
        *response.status_mut() = self.status();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
