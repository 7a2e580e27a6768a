//! Logging and OTLP tracing setup shared by the n8n gateway binaries.

pub mod config;
pub mod otlp;
pub mod spans;

pub use config::{LogFormat, OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
