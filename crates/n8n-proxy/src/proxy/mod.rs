//! Forwarding core: URL rewrite, upstream attempts with 404 fallback, and relay.

pub mod error;
pub mod forward;
pub mod relay;
pub mod rewrite;
