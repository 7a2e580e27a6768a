//! n8n-proxy: CORS-friendly forwarding gateway in front of n8n webhooks.

mod config;
mod cors;
mod proxy;
mod server;

#[cfg(test)]
mod testing;

use std::time::Duration;

use config::ProxyConfig;
use server::AppState;

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("N8N_PROXY_CONFIG").ok())
            .unwrap_or_else(|| "n8n-proxy.toml".to_string())
    };

    // Strict mode fails here, before anything is bound
    let config = ProxyConfig::load(&config_path)?;

    // The tonic OTLP exporter needs a reactor, so build the runtime first
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = n8n_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            upstream_base = ?config.upstream.base_url(),
            allowed_origin = ?config.cors.allowed_origin(),
            basic_auth = config.upstream.basic_auth().is_some(),
            otlp_export = tracing_guard.exporting(),
            "Starting n8n-proxy"
        );

        for missing in config.missing_required() {
            tracing::warn!(setting = missing, "Required setting missing, serving error responses");
        }

        run(config).await
    })
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    // Connect only: the response-head limit is applied per attempt and the
    // relayed body stays unbounded
    let upstream_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.upstream.timeout_secs))
        .build()?;

    let state = AppState {
        config,
        upstream_client,
    };

    server::run(state).await
}
