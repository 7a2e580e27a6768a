//! Upstream attempts: primary `/webhook/` call plus the single `/webhook-test/`
//! retry on 404.

use std::time::{Duration, Instant};

use axum::http::{HeaderValue, Method, StatusCode};
use bytes::Bytes;
use tracing::Instrument;

use super::error::ProxyError;
use super::rewrite::ForwardTarget;

/// Header the relocated `key` query parameter is sent in.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Content type assumed when the client sends none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Id attached to the log spans of one forwarded request.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Everything needed to issue (and repeat) the upstream request.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub request_id: String,
    pub method: Method,
    pub target: ForwardTarget,
    pub content_type: HeaderValue,
    /// `None` for GET and HEAD.
    pub body: Option<Bytes>,
    pub basic_auth: Option<(String, String)>,
    /// Bound on waiting for the response head of one attempt. The relayed
    /// body is not covered.
    pub timeout: Option<Duration>,
}

impl ForwardRequest {
    pub fn new(
        request_id: String,
        method: Method,
        target: ForwardTarget,
        content_type: Option<HeaderValue>,
        body: Bytes,
    ) -> Self {
        let body = if method == Method::GET || method == Method::HEAD {
            None
        } else {
            Some(body)
        };
        Self {
            request_id,
            method,
            target,
            content_type: content_type
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
            body,
            basic_auth: None,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_basic_auth(mut self, user: &str, pass: &str) -> Self {
        self.basic_auth = Some((user.to_string(), pass.to_string()));
        self
    }
}

/// Which upstream URL produced the final response.
#[derive(Debug)]
pub enum ForwardOutcome {
    /// The `/webhook/` call answered with something other than 404.
    Primary(reqwest::Response),
    /// The `/webhook/` call returned 404 and this is the `/webhook-test/` reply,
    /// whatever its status.
    FallbackUsed(reqwest::Response),
}

impl ForwardOutcome {
    pub fn fallback_used(&self) -> bool {
        matches!(self, ForwardOutcome::FallbackUsed(_))
    }

    pub fn response(&self) -> &reqwest::Response {
        match self {
            ForwardOutcome::Primary(resp) | ForwardOutcome::FallbackUsed(resp) => resp,
        }
    }

    pub fn into_response(self) -> reqwest::Response {
        match self {
            ForwardOutcome::Primary(resp) | ForwardOutcome::FallbackUsed(resp) => resp,
        }
    }
}

/// Send to the primary URL; on exactly 404, send once more to the fallback URL.
pub async fn send_with_fallback(
    client: &reqwest::Client,
    request: &ForwardRequest,
) -> Result<ForwardOutcome, ProxyError> {
    let primary = send_attempt(client, request, "primary", &request.target.primary).await?;
    if primary.status() != StatusCode::NOT_FOUND {
        return Ok(ForwardOutcome::Primary(primary));
    }

    tracing::info!(
        url = %request.target.fallback,
        "Primary webhook returned 404, retrying test webhook"
    );
    let fallback = send_attempt(client, request, "fallback", &request.target.fallback).await?;
    Ok(ForwardOutcome::FallbackUsed(fallback))
}

async fn send_attempt(
    client: &reqwest::Client,
    request: &ForwardRequest,
    attempt: &str,
    url: &url::Url,
) -> Result<reqwest::Response, ProxyError> {
    let span = n8n_tracing::upstream_attempt_span!(request.request_id, attempt, url);
    let start = Instant::now();

    async {
        let mut builder = client
            .request(request.method.clone(), url.clone())
            .header(API_KEY_HEADER, request.target.api_key.as_str())
            .header(http::header::CONTENT_TYPE, request.content_type.clone());

        if let Some((user, pass)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(pass));
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let sent = builder.send();
        let result = match request.timeout {
            Some(limit) => match tokio::time::timeout(limit, sent).await {
                Ok(result) => result.map_err(ProxyError::Transport),
                Err(_) => Err(ProxyError::Timeout(limit)),
            },
            None => sent.await.map_err(ProxyError::Transport),
        };
        let latency = start.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency);

        match result {
            Ok(resp) => {
                tracing::Span::current().record("status", resp.status().as_u16());
                tracing::debug!(status = resp.status().as_u16(), latency_ms = latency, "Upstream answered");
                Ok(resp)
            }
            Err(err @ ProxyError::Timeout(_)) => {
                tracing::error!(error = %err, latency_ms = latency, "Upstream timeout");
                Err(err)
            }
            Err(ProxyError::Transport(e)) if e.is_timeout() => {
                tracing::error!(error = %e, latency_ms = latency, "Upstream connect timeout");
                Err(ProxyError::Transport(e))
            }
            Err(err) => {
                tracing::error!(error = %err, latency_ms = latency, "Upstream connection error");
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}
