//! CORS negotiation middleware.
//!
//! Pre-flight `OPTIONS` requests are answered here and never reach a handler.
//! Every other response gets `Access-Control-Allow-Origin` and `Vary: Origin`,
//! including error and catch-all responses.

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::CorsConfig;

pub const ALLOW_METHODS: &str = "GET,POST,OPTIONS";
pub const ALLOW_HEADERS: &str = "X-API-Key, Content-Type, Authorization";
pub const MAX_AGE_SECS: &str = "86400";

/// Resolved cross-origin policy, shared by every request.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_origin: HeaderValue,
}

impl CorsPolicy {
    /// Use the configured origin, or `*` when none is set.
    pub fn from_config(config: &CorsConfig) -> Self {
        let allow_origin = match config.allowed_origin() {
            Some(origin) => HeaderValue::from_str(origin).unwrap_or_else(|e| {
                tracing::warn!(
                    origin = %origin,
                    error = %e,
                    "Allowed origin is not a valid header value, using *"
                );
                HeaderValue::from_static("*")
            }),
            None => HeaderValue::from_static("*"),
        };
        Self { allow_origin }
    }

    fn preflight(&self) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE_SECS));
        headers.insert(VARY, HeaderValue::from_static("Origin"));
        response
    }

    fn decorate(&self, headers: &mut HeaderMap) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        if !varies_on_origin(headers) {
            headers.append(VARY, HeaderValue::from_static("Origin"));
        }
    }
}

/// Whether any `Vary` value already lists `Origin` (or `*`).
fn varies_on_origin(headers: &HeaderMap) -> bool {
    headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|token| token == "*" || token.eq_ignore_ascii_case("origin"))
}

/// Axum middleware: answer pre-flights, decorate everything else.
pub async fn negotiate(State(policy): State<CorsPolicy>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        tracing::debug!(path = %request.uri().path(), "Answering CORS pre-flight");
        return policy.preflight();
    }

    let mut response = next.run(request).await;
    policy.decorate(response.headers_mut());
    response
}
