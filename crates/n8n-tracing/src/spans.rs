//! Span builder helpers for gateway instrumentation.

/// Create a tracing span for one forwarded `/n8n/` request.
///
/// Usage: `let span = forward_request_span!(request_id, method, path);`
///
/// Fields recorded later:
/// - `fallback_used`: whether the `/webhook-test/` retry produced the reply
/// - `status`: status code relayed to the client
#[macro_export]
macro_rules! forward_request_span {
    ($request_id:expr, $method:expr, $path:expr) => {
        tracing::info_span!(
            "forward_request",
            request_id = %$request_id,
            method = %$method,
            path = %$path,
            fallback_used = tracing::field::Empty,
            status = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for a single upstream attempt (primary or fallback).
#[macro_export]
macro_rules! upstream_attempt_span {
    ($request_id:expr, $attempt:expr, $url:expr) => {
        tracing::info_span!(
            "upstream_attempt",
            request_id = %$request_id,
            attempt = %$attempt,
            url = %$url,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
