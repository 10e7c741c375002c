//! # Configuration Modules
//!
//! Describes what a live feed connects to (stream and polling endpoints,
//! static headers) and how hard it tries before giving up on streaming.

/// Endpoint, header and retry-policy configuration for one live feed.
pub mod feed_config;

pub use feed_config::{LiveFeedConfig, ResolvedConfig, RetryPolicy};
