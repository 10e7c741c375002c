//! # Live Feed Configuration
//!
//! `LiveFeedConfig` is the serde-friendly description a screen hands to
//! `LiveFeedClient::connect`. It is validated once into a [`ResolvedConfig`]
//! holding parsed URLs and a ready-made `HeaderMap`, so a bad endpoint is
//! reported at mount time instead of on every reconnect.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::FeedError;

/// Stream reconnect attempts allowed before switching to polling.
pub const MAX_ATTEMPTS: u32 = 5;
/// Delay before the first reconnect, doubled on every further attempt.
pub const BASE_DELAY_MS: u64 = 1_000;
/// Upper bound for a single reconnect delay.
pub const MAX_DELAY_MS: u64 = 30_000;
/// Interval between two polling fetches once streaming is abandoned.
pub const POLL_INTERVAL_MS: u64 = 30_000;
/// Silence on an open stream after which the transport reports a keep-alive timeout.
pub const IDLE_TIMEOUT_MS: u64 = 45_000;

/// Retry parameters shared by the backoff scheduler and the polling fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }
}

impl RetryPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Screen-facing configuration of one live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveFeedConfig {
    /// The server-push (SSE) endpoint.
    pub stream_url: String,
    /// Plain request/response equivalent of the stream. When absent the
    /// stream URL itself is fetched with `Accept: application/json`.
    #[serde(default)]
    pub poll_url: Option<String>,
    /// Static headers sent with every stream and poll request (e.g. cache-control).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub policy: RetryPolicy,
}

fn default_idle_timeout_ms() -> u64 {
    IDLE_TIMEOUT_MS
}

/// A validated `LiveFeedConfig`.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub stream_url: Url,
    pub poll_url: Url,
    /// `true` when `poll_url` was not configured and falls back to the stream URL.
    pub poll_uses_stream_url: bool,
    pub headers: HeaderMap,
    pub idle_timeout: Duration,
    pub policy: RetryPolicy,
}

impl LiveFeedConfig {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            poll_url: None,
            headers: BTreeMap::new(),
            idle_timeout_ms: IDLE_TIMEOUT_MS,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_poll_url(mut self, poll_url: impl Into<String>) -> Self {
        self.poll_url = Some(poll_url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout_ms = u64::try_from(idle_timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Parses URLs and headers.
    ///
    /// # Errors
    /// Returns `FeedError::InvalidUrl` for a malformed or relative URL and
    /// `FeedError::InvalidHeader` for a header that is not valid HTTP.
    pub fn validate(&self) -> Result<ResolvedConfig, FeedError> {
        let stream_url = parse_url(&self.stream_url)?;
        let (poll_url, poll_uses_stream_url) = match &self.poll_url {
            Some(raw) => (parse_url(raw)?, false),
            None => (stream_url.clone(), true),
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| FeedError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| FeedError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            headers.insert(header_name, header_value);
        }

        Ok(ResolvedConfig {
            stream_url,
            poll_url,
            poll_uses_stream_url,
            headers,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            policy: self.policy,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, FeedError> {
    Url::parse(raw).map_err(|source| FeedError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}
