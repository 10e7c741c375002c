//! # Stream Session
//!
//! Owns the single live push-stream of a feed. A [`StreamTransport`] turns a
//! [`StreamRequest`] into a stream of [`TransportEvent`]s; the session runs
//! that stream on its own task, tags every event with the session token and
//! forwards it to the driver. Closing aborts the task, which drops the
//! underlying HTTP response, so nothing from a closed session is observed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::errors::FeedError;
use crate::feed::classifier::{TransportError, TransportErrorKind};
use crate::feed::machine::{FeedEvent, Token};
use crate::feed::sse::SseDecoder;

const USER_AGENT: &str = "LiveFeed/1.0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Consecutive idle periods without a byte after which an open stream is dead.
const MAX_SILENT_PERIODS: u32 = 2;

/// Everything needed to open one stream.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: Url,
    pub headers: HeaderMap,
    /// Silence after which a keep-alive timeout is reported.
    pub idle_timeout: Duration,
}

/// What a transport reports about an open stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is live.
    Open,
    /// Raw payload of one event.
    Message(String),
    /// Something went wrong. The stream may continue after transient errors.
    Error(TransportError),
}

/// Opens server-push streams.
pub trait StreamTransport: Send + Sync + 'static {
    fn open(&self, request: &StreamRequest) -> BoxStream<'static, TransportEvent>;
}

/// Server-sent events over `reqwest`.
#[derive(Clone)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    /// # Errors
    /// Returns `FeedError::Http` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

struct Reading {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    queued: VecDeque<TransportEvent>,
    idle_timeout: Duration,
    silent_periods: u32,
}

impl Reading {
    fn new(body: BoxStream<'static, reqwest::Result<Bytes>>, idle_timeout: Duration) -> Self {
        Self {
            body,
            decoder: SseDecoder::new(),
            queued: VecDeque::new(),
            idle_timeout,
            silent_periods: 0,
        }
    }
}

enum Phase {
    Connect(reqwest::RequestBuilder, Duration),
    Read(Reading),
    Finished,
}

impl StreamTransport for SseTransport {
    fn open(&self, request: &StreamRequest) -> BoxStream<'static, TransportEvent> {
        let builder = self
            .client
            .get(request.url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .headers(request.headers.clone());

        stream::unfold(
            Phase::Connect(builder, request.idle_timeout),
            |phase| async move {
                match phase {
                    Phase::Connect(builder, idle_timeout) => Some(connect(builder, idle_timeout).await),
                    Phase::Read(reading) => Some(read_next(reading).await),
                    Phase::Finished => None,
                }
            },
        )
        .boxed()
    }
}

/// Waits at most one idle period for the response headers.
async fn connect(builder: reqwest::RequestBuilder, idle_timeout: Duration) -> (TransportEvent, Phase) {
    let sent = match tokio::time::timeout(idle_timeout, builder.send()).await {
        Ok(sent) => sent,
        Err(_) => {
            let error = TransportError::new(
                TransportErrorKind::Connect,
                format!("no response within {}ms", idle_timeout.as_millis()),
            );
            return (TransportEvent::Error(error), Phase::Finished);
        }
    };

    match sent {
        Ok(response) if response.status().is_success() => {
            let reading = Reading::new(response.bytes_stream().boxed(), idle_timeout);
            (TransportEvent::Open, Phase::Read(reading))
        }
        Ok(response) => {
            let status = response.status();
            let error = TransportError::new(
                TransportErrorKind::Status(status.as_u16()),
                format!("server answered {}", status),
            );
            (TransportEvent::Error(error), Phase::Finished)
        }
        Err(e) => {
            let error = TransportError::new(TransportErrorKind::Connect, e.to_string());
            (TransportEvent::Error(error), Phase::Finished)
        }
    }
}

/// One silent idle period is reported as a keep-alive timeout; a second one in
/// a row drops the body and fails the stream.
async fn read_next(mut reading: Reading) -> (TransportEvent, Phase) {
    loop {
        if let Some(event) = reading.queued.pop_front() {
            return (event, Phase::Read(reading));
        }

        match tokio::time::timeout(reading.idle_timeout, reading.body.next()).await {
            Err(_) => {
                reading.silent_periods += 1;
                if reading.silent_periods >= MAX_SILENT_PERIODS {
                    let error = TransportError::new(
                        TransportErrorKind::Stream,
                        format!(
                            "no data for {} idle periods of {}ms; connection presumed dead",
                            reading.silent_periods,
                            reading.idle_timeout.as_millis()
                        ),
                    );
                    return (TransportEvent::Error(error), Phase::Finished);
                }
                let error = TransportError::keep_alive_timeout(reading.idle_timeout);
                return (TransportEvent::Error(error), Phase::Read(reading));
            }
            Ok(Some(Ok(chunk))) => {
                reading.silent_periods = 0;
                let events = match reading.decoder.feed(&chunk) {
                    Ok(events) => events,
                    Err(e) => {
                        let error = TransportError::new(TransportErrorKind::Stream, e.to_string());
                        return (TransportEvent::Error(error), Phase::Finished);
                    }
                };
                for event in events {
                    if event.is_message() {
                        reading.queued.push_back(TransportEvent::Message(event.data));
                    } else {
                        log::debug!("Ignoring named event '{}'", event.event.unwrap_or_default());
                    }
                }
            }
            Ok(Some(Err(e))) => {
                let error = TransportError::new(TransportErrorKind::Stream, e.to_string());
                return (TransportEvent::Error(error), Phase::Finished);
            }
            Ok(None) => return (TransportEvent::Error(TransportError::stream_ended()), Phase::Finished),
        }
    }
}

/// The driver-side handle of the one open stream.
#[derive(Default)]
pub(crate) struct StreamSession {
    active: Option<(Token, JoinHandle<()>)>,
}

impl StreamSession {
    pub(crate) fn open(
        &mut self,
        token: Token,
        transport: &Arc<dyn StreamTransport>,
        request: &StreamRequest,
        events: &mpsc::UnboundedSender<FeedEvent>,
    ) {
        self.close_any();
        log::info!("Opening live feed stream: {}", request.url);

        let mut stream = transport.open(request);
        let events = events.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let event = match event {
                    TransportEvent::Open => FeedEvent::Opened(token),
                    TransportEvent::Message(raw) => FeedEvent::Message(token, raw),
                    TransportEvent::Error(error) => FeedEvent::Failed(token, error),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            // A transport that just stops has lost its connection.
            let _ = events.send(FeedEvent::Failed(token, TransportError::stream_ended()));
        });

        self.active = Some((token, handle));
    }

    /// Closes the session if `token` is the open one; otherwise a no-op.
    pub(crate) fn close(&mut self, token: Token) {
        if matches!(&self.active, Some((open, _)) if *open == token) {
            self.close_any();
        }
    }

    fn close_any(&mut self) {
        if let Some((_, handle)) = self.active.take() {
            handle.abort();
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close_any();
    }
}
