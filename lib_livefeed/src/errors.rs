use thiserror::Error;

/// Errors raised while building or talking to a live feed endpoint.
///
/// None of these ever reach a feed consumer: the client reports failures only
/// through status changes. They surface from configuration validation and from
/// the HTTP layer, where the feed turns them into transport errors or swallows
/// them during polling.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "retrieve")]
    #[error("HTTP middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
