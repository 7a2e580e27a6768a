//! Failures of the forwarding path and their client-facing responses.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream base URL not set")]
    MissingUpstream,

    #[error("invalid upstream base URL {url:?}: {source}")]
    InvalidUpstream {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("path {path:?} leaves the webhook prefix")]
    UnsafePath { path: String },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream did not answer within {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingUpstream | ProxyError::InvalidUpstream { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::UnsafePath { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Transport(_) | ProxyError::Timeout(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Render an error and its sources as one line, e.g.
/// `error sending request: client error (Connect): Connection refused`.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !detail.contains(&text) {
            detail.push_str(": ");
            detail.push_str(&text);
        }
        source = cause.source();
    }
    detail
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match &self {
            ProxyError::MissingUpstream => json!({ "error": self.to_string() }),
            ProxyError::InvalidUpstream { source, .. } => json!({
                "error": "invalid upstream base URL",
                "detail": source.to_string(),
            }),
            ProxyError::UnsafePath { .. } => json!({
                "error": "Bad Request",
                "detail": self.to_string(),
            }),
            ProxyError::Transport(e) => json!({
                "error": "Proxy error",
                "detail": error_chain(e),
            }),
            ProxyError::Timeout(_) => json!({
                "error": "Proxy error",
                "detail": self.to_string(),
            }),
        };
        (self.status(), axum::Json(body)).into_response()
    }
}
