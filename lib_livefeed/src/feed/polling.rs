//! # Polling Fallback
//!
//! Once streaming is abandoned the feed re-fetches the same logical data with
//! plain requests on a fixed interval. The first fetch happens as soon as
//! polling starts; after that one per interval. Fetch failures are the
//! machine's business (it logs and waits for the next tick), so results of
//! every kind are simply forwarded.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use url::Url;

use crate::errors::FeedError;
use crate::feed::machine::{FeedEvent, Token};
use crate::retrieve::ApiClient;

/// Per-request timeout for polling fetches.
const POLL_TIMEOUT: Duration = Duration::from_secs(10);
/// Middleware retries within one tick; the interval itself is the real retry.
const POLL_RETRIES: u32 = 1;

/// The non-streaming equivalent of a stream endpoint.
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

/// Fetches one snapshot body.
pub trait SnapshotFetcher: Send + Sync + 'static {
    fn fetch(&self, request: &PollRequest) -> BoxFuture<'static, Result<String, FeedError>>;
}

/// Plain HTTP polling through the retrying [`ApiClient`].
pub struct HttpPoller {
    client: Arc<ApiClient>,
}

impl HttpPoller {
    /// # Errors
    /// Returns `FeedError::Http` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, FeedError> {
        let client = ApiClient::new(HeaderMap::new(), POLL_TIMEOUT, POLL_RETRIES)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }
}

impl SnapshotFetcher for HttpPoller {
    fn fetch(&self, request: &PollRequest) -> BoxFuture<'static, Result<String, FeedError>> {
        let client = Arc::clone(&self.client);
        let request = request.clone();
        async move {
            client
                .get_text(request.url, Some(request.headers))
                .await?
                .into_result()
        }
        .boxed()
    }
}

struct ActivePoll {
    token: Token,
    interval: Interval,
    inflight: Option<JoinHandle<()>>,
}

/// The driver-side polling timer.
#[derive(Default)]
pub(crate) struct PollingFallback {
    active: Option<ActivePoll>,
}

impl PollingFallback {
    pub(crate) fn start(&mut self, token: Token, period: Duration) {
        self.stop_any();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.active = Some(ActivePoll {
            token,
            interval,
            inflight: None,
        });
    }

    pub(crate) fn stop(&mut self, token: Token) {
        if matches!(&self.active, Some(poll) if poll.token == token) {
            self.stop_any();
        }
    }

    /// Resolves on the next tick; never resolves while polling is stopped.
    pub(crate) async fn tick(&mut self) -> Token {
        match &mut self.active {
            Some(poll) => {
                poll.interval.tick().await;
                poll.token
            }
            None => std::future::pending().await,
        }
    }

    /// Starts one fetch unless the previous one is still running.
    pub(crate) fn fetch(
        &mut self,
        token: Token,
        fetcher: &Arc<dyn SnapshotFetcher>,
        request: &PollRequest,
        events: &mpsc::UnboundedSender<FeedEvent>,
    ) {
        let Some(poll) = self.active.as_mut().filter(|poll| poll.token == token) else {
            return;
        };
        if poll.inflight.as_ref().is_some_and(|handle| !handle.is_finished()) {
            log::debug!("Previous poll still in flight; skipping tick.");
            return;
        }

        let fetch = fetcher.fetch(request);
        let events = events.clone();
        poll.inflight = Some(tokio::spawn(async move {
            let result = fetch.await.map_err(|e| e.to_string());
            let _ = events.send(FeedEvent::Polled(token, result));
        }));
    }

    fn stop_any(&mut self) {
        if let Some(poll) = self.active.take() {
            if let Some(handle) = poll.inflight {
                handle.abort();
            }
        }
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.stop_any();
    }
}
