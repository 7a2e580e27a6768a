//! Turning the upstream reply into the client response.
//!
//! The body is streamed verbatim, so `content-encoding` stays valid and is
//! kept. `content-length` is dropped and recomputed by the server.

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Headers that are never copied from the upstream response.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-length",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
];

pub fn should_relay_header(name: &str) -> bool {
    !SKIPPED_RESPONSE_HEADERS.contains(&name.to_ascii_lowercase().as_str())
}

/// Build the client response: upstream status, filtered headers, raw body stream.
pub fn relay_response(upstream: reqwest::Response) -> Response {
    let mut builder = Response::builder().status(upstream.status());

    for (name, value) in upstream.headers().iter() {
        if !should_relay_header(name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }

    let body = Body::from_stream(upstream.bytes_stream());

    builder.body(body).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build relayed response");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    })
}
