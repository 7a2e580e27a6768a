//! Configuration types and loading logic.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use n8n_tracing::TracingConfig;
use serde::Deserialize;

/// Top-level gateway configuration. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Largest inbound request body accepted, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Refuse to start when the upstream base URL or allowed origin is missing,
    /// instead of serving error responses.
    #[serde(default)]
    pub require_config: bool,
}

/// The n8n instance requests are forwarded to.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// e.g. `https://n8n.example.com` (no `/webhook` suffix).
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub basic_user: Option<String>,

    #[serde(default)]
    pub basic_pass: Option<String>,

    /// Limit on connecting and on waiting for each attempt's response head.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    /// Value for `Access-Control-Allow-Origin`; `*` when unset.
    #[serde(default)]
    pub allowed_origin: Option<String>,
}

fn default_listen_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_timeout() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_body_bytes: default_max_body_bytes(),
            require_config: false,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            basic_user: None,
            basic_pass: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// The configured base URL, ignoring empty values.
    pub fn base_url(&self) -> Option<&str> {
        non_empty(self.base_url.as_deref())
    }

    /// Basic-auth credentials, only when both halves are present.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (
            non_empty(self.basic_user.as_deref()),
            non_empty(self.basic_pass.as_deref()),
        ) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}

impl CorsConfig {
    pub fn allowed_origin(&self) -> Option<&str> {
        non_empty(self.allowed_origin.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl ProxyConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Deployment variables: `N8N_BASE`, `CORS_ALLOW_ORIGIN`, `BASIC_USER`,
    ///    `BASIC_PASS`, `PORT`
    /// 2. Environment variables (N8N_PROXY_ prefix, __ for nesting)
    /// 3. TOML config file
    /// 4. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let mut config: ProxyConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("N8N_PROXY_").split("__"))
            .extract()?;

        if let Ok(base) = std::env::var("N8N_BASE") {
            config.upstream.base_url = Some(base);
        }
        if let Ok(origin) = std::env::var("CORS_ALLOW_ORIGIN") {
            config.cors.allowed_origin = Some(origin);
        }
        if let Ok(user) = std::env::var("BASIC_USER") {
            config.upstream.basic_user = Some(user);
        }
        if let Ok(pass) = std::env::var("BASIC_PASS") {
            config.upstream.basic_pass = Some(pass);
        }
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT {port:?}: {e}"))?;
            config.server.listen_address = format!("0.0.0.0:{port}");
        }

        if config.server.require_config {
            config.ensure_complete()?;
        }

        Ok(config)
    }

    /// Names of required settings that are not set.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.upstream.base_url().is_none() {
            missing.push("upstream.base_url (N8N_BASE)");
        }
        if self.cors.allowed_origin().is_none() {
            missing.push("cors.allowed_origin (CORS_ALLOW_ORIGIN)");
        }
        missing
    }

    pub fn ensure_complete(&self) -> anyhow::Result<()> {
        let missing = self.missing_required();
        if missing.is_empty() {
            return Ok(());
        }
        anyhow::bail!("missing required configuration: {}", missing.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let config = ProxyConfig::load("absent.toml").unwrap();
            assert_eq!(config.server.listen_address, "0.0.0.0:3000");
            assert_eq!(config.server.max_body_bytes, 10 * 1024 * 1024);
            assert!(!config.server.require_config);
            assert_eq!(config.upstream.timeout_secs, 60);
            assert!(config.upstream.base_url().is_none());
            assert!(config.cors.allowed_origin().is_none());
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_then_prefixed_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "n8n-proxy.toml",
                r#"
                [server]
                listen_address = "127.0.0.1:8080"

                [upstream]
                base_url = "https://n8n.internal"
                timeout_secs = 15

                [cors]
                allowed_origin = "https://app.example.com"
                "#,
            )?;
            jail.set_env("N8N_PROXY_UPSTREAM__TIMEOUT_SECS", "5");

            let config = ProxyConfig::load("n8n-proxy.toml").unwrap();
            assert_eq!(config.server.listen_address, "127.0.0.1:8080");
            assert_eq!(config.upstream.base_url(), Some("https://n8n.internal"));
            assert_eq!(config.upstream.timeout_secs, 5);
            assert_eq!(config.cors.allowed_origin(), Some("https://app.example.com"));
            Ok(())
        });
    }

    #[test]
    fn test_deployment_variables_override_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "n8n-proxy.toml",
                r#"
                [upstream]
                base_url = "https://from-file.example"
                "#,
            )?;
            jail.set_env("N8N_BASE", "https://from-env.example");
            jail.set_env("CORS_ALLOW_ORIGIN", "https://pages.example.io");
            jail.set_env("BASIC_USER", "hook");
            jail.set_env("BASIC_PASS", "s3cret");
            jail.set_env("PORT", "8081");

            let config = ProxyConfig::load("n8n-proxy.toml").unwrap();
            assert_eq!(config.upstream.base_url(), Some("https://from-env.example"));
            assert_eq!(config.cors.allowed_origin(), Some("https://pages.example.io"));
            assert_eq!(config.upstream.basic_auth(), Some(("hook", "s3cret")));
            assert_eq!(config.server.listen_address, "0.0.0.0:8081");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("PORT", "http");
            assert!(ProxyConfig::load("absent.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn test_require_config_halts_on_missing_values() {
        Jail::expect_with(|jail| {
            jail.set_env("N8N_PROXY_SERVER__REQUIRE_CONFIG", "true");
            jail.set_env("N8N_BASE", "https://n8n.internal");

            let err = ProxyConfig::load("absent.toml").unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("cors.allowed_origin"), "{msg}");
            assert!(!msg.contains("upstream.base_url"), "{msg}");
            Ok(())
        });
    }

    #[test]
    fn test_empty_values_count_as_missing() {
        let mut config = ProxyConfig::default();
        config.upstream.base_url = Some(String::new());
        config.upstream.basic_user = Some("user".to_string());
        config.upstream.basic_pass = Some(String::new());
        config.cors.allowed_origin = Some(String::new());

        assert!(config.upstream.base_url().is_none());
        assert!(config.upstream.basic_auth().is_none());
        assert_eq!(config.missing_required().len(), 2);
        assert!(config.ensure_complete().is_err());
    }
}
