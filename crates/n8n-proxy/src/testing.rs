//! Test helpers: a recording mock n8n upstream and an in-process gateway.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::{HeaderMap, Method};
use axum::response::IntoResponse;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::ProxyConfig;
use crate::server::{router, AppState};

/// One request as received by the mock upstream.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Mock upstream that records every request and answers via `respond`.
pub struct MockUpstream {
    pub base_url: String,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockUpstream {
    pub async fn start<F, R>(respond: F) -> Self
    where
        F: Fn(&CapturedRequest) -> R + Send + Sync + 'static,
        R: IntoResponse + 'static,
    {
        let captured: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let captured_clone = captured.clone();
        let respond = Arc::new(respond);

        let app = axum::Router::new().fallback(move |request: Request| {
            let captured = captured_clone.clone();
            let respond = respond.clone();
            async move {
                let (parts, body) = request.into_parts();
                let body = axum::body::to_bytes(body, usize::MAX)
                    .await
                    .unwrap_or_default();
                let seen = CapturedRequest {
                    method: parts.method,
                    path: parts.uri.path().to_string(),
                    query: parts.uri.query().map(str::to_string),
                    headers: parts.headers,
                    body,
                };
                let response = respond(&seen).into_response();
                captured.lock().await.push(seen);
                response
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, app).into_future());

        Self {
            base_url: format!("http://{addr}"),
            captured,
        }
    }

    pub async fn requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().await.clone()
    }
}

/// Serve the gateway on an ephemeral port; returns its base URL.
pub async fn spawn_gateway(config: ProxyConfig) -> String {
    let state = AppState {
        config,
        upstream_client: reqwest::Client::new(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, router(state)).into_future());
    format!("http://{addr}")
}

/// A base URL nothing is listening on.
pub fn unreachable_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Raw TCP upstream: once a request arrives, write each chunk after its delay,
/// then close. Returns its base URL.
pub async fn scripted_upstream(script: Vec<(Duration, &'static [u8])>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let script = script.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                for (delay, chunk) in script {
                    tokio::time::sleep(delay).await;
                    if socket.write_all(chunk).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    format!("http://{addr}")
}

/// Send `head` verbatim to the gateway over TCP and return the raw reply.
/// Bypasses client-side path normalization.
pub async fn raw_request(gateway: &str, head: &str) -> String {
    let addr = gateway.trim_start_matches("http://");
    let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    socket.write_all(head.as_bytes()).await.unwrap();
    let mut reply = Vec::new();
    socket.read_to_end(&mut reply).await.unwrap();
    String::from_utf8_lossy(&reply).into_owned()
}
