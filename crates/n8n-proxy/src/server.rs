//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{middleware, Router};
use bytes::Bytes;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::cors::{self, CorsPolicy};
use crate::proxy::error::ProxyError;
use crate::proxy::forward::{self, ForwardRequest};
use crate::proxy::relay::relay_response;
use crate::proxy::rewrite::ForwardTarget;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub upstream_client: reqwest::Client,
}

/// Assemble the gateway routes and middleware.
pub fn router(state: AppState) -> Router {
    let cors_policy = CorsPolicy::from_config(&state.config.cors);
    let max_body_bytes = state.config.server.max_body_bytes;

    Router::new()
        .route("/", get(handle_root).fallback(handle_not_found))
        .route("/health", get(handle_health).fallback(handle_not_found))
        .route("/n8n/", any(handle_forward))
        .route("/n8n/{*rest}", any(handle_forward))
        .fallback(handle_not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn_with_state(cors_policy, cors::negotiate))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "n8n-proxy listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("n8n-proxy shut down gracefully");
    Ok(())
}

/// Handler for `ANY /n8n/<rest>`.
///
/// 1. Refuse without an upstream (no network call)
/// 2. Rewrite `/n8n/` to `/webhook/` and move `?key=` into `X-API-Key`,
///    refusing paths that would leave the webhook prefix
/// 3. Send, retrying `/webhook-test/` once on 404
/// 4. Relay the final response
async fn handle_forward(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = forward::new_request_id();
    let span = n8n_tracing::forward_request_span!(request_id, method, uri.path());

    async {
        let Some(base_url) = state.config.upstream.base_url() else {
            let err = ProxyError::MissingUpstream;
            tracing::error!(error = %err, "Refusing to forward");
            return err.into_response();
        };

        let target = match ForwardTarget::resolve(base_url, uri.path(), uri.query()) {
            Ok(target) => target,
            Err(err) => {
                tracing::error!(error = %err, "Refusing to forward");
                return err.into_response();
            }
        };

        let mut request = ForwardRequest::new(
            request_id.clone(),
            method,
            target,
            headers.get(CONTENT_TYPE).cloned(),
            body,
        )
        .with_timeout(Duration::from_secs(state.config.upstream.timeout_secs));
        if let Some((user, pass)) = state.config.upstream.basic_auth() {
            request = request.with_basic_auth(user, pass);
        }

        let span = tracing::Span::current();
        match forward::send_with_fallback(&state.upstream_client, &request).await {
            Ok(outcome) => {
                let status = outcome.response().status().as_u16();
                span.record("fallback_used", outcome.fallback_used());
                span.record("status", status);
                tracing::info!(
                    status,
                    fallback_used = outcome.fallback_used(),
                    "Forward complete"
                );
                relay_response(outcome.into_response())
            }
            Err(err) => {
                span.record("status", err.status().as_u16());
                tracing::error!(error = %err, "[Proxy Error] upstream unreachable");
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// Configuration completeness check.
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let upstream_set = state.config.upstream.base_url().is_some();
    let origin_set = state.config.cors.allowed_origin().is_some();
    let ok = upstream_set && origin_set;

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let body = serde_json::json!({
        "ok": ok,
        "upstream_base": presence(upstream_set),
        "allowed_origin": presence(origin_set),
    });
    (status, axum::Json(body)).into_response()
}

fn presence(set: bool) -> &'static str {
    if set {
        "set"
    } else {
        "missing"
    }
}

/// Liveness for health checks that default to `/`.
async fn handle_root() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Catch-all for anything outside `/n8n/`.
async fn handle_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({
            "error": "Not Found",
            "hint": "Use /n8n/<path>",
        })),
    )
        .into_response()
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
