//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest` with middleware support
//! for exponential backoff retries and a uniform response container.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::errors::FeedError;

/// User agent sent with every request.
const USER_AGENT: &str = "LiveFeed/1.0";

/// A standardized container for API responses.
///
/// This struct wraps the response body along with metadata about the
/// HTTP transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The response body on a 2xx status.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// Returns the body of a successful response, or a `FeedError::Status`
    /// carrying the error body otherwise.
    pub fn into_result(self) -> Result<T, FeedError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(FeedError::Status {
                status: self.status,
                body: self.error_body.unwrap_or_default(),
            }),
        }
    }
}

/// An asynchronous HTTP client for absolute URLs.
///
/// Built on top of `reqwest_middleware`; transient failures (connect errors,
/// 5xx, 429) are retried with exponential backoff before an error is returned.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// Headers added to every request.
    default_headers: HeaderMap,
}

impl ApiClient {
    /// Creates a new `ApiClient` with a request timeout and a retry policy.
    ///
    /// # Arguments
    /// * `default_headers` - Headers attached to every request.
    /// * `timeout` - Upper bound for a single request, retries excluded.
    /// * `max_retries` - Transient-failure retries performed by the middleware.
    ///
    /// # Errors
    /// Returns `FeedError::Http` if the underlying TLS backend cannot be initialised.
    pub fn new(
        default_headers: HeaderMap,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            default_headers,
        })
    }

    /// Performs a `GET` and returns the body as text.
    ///
    /// Non-2xx responses are not errors at this level: they are reported through
    /// `ApiResponse::success` with the body kept in `error_body`.
    ///
    /// # Errors
    /// Returns a `FeedError` if the request could not be executed or the body
    /// could not be read.
    pub async fn get_text(
        &self,
        url: Url,
        headers: Option<HeaderMap>,
    ) -> Result<ApiResponse<String>, FeedError> {
        let target = url.to_string();
        let mut req = self.inner.get(url).headers(self.default_headers.clone());

        if let Some(h) = headers {
            req = req.headers(h);
        }

        let response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let body = response.text().await?;
            log::trace!("GET {} -> {} ({} bytes)", target, status, body.len());
            Ok(ApiResponse {
                data: Some(body),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            log::debug!("GET {} -> {}", target, status);
            // Capture the error body as a string for debugging
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}
