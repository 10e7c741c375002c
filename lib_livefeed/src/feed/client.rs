//! # Live Feed Client
//!
//! The screen-facing handle. `connect` validates the configuration and spawns
//! one driver task that owns the [`FeedMachine`], the stream session, the
//! reconnect timer and the polling interval, and multiplexes their inputs with
//! `tokio::select!`. Only one input is processed at a time.
//!
//! Teardown (`disconnect` or dropping the handle) first detaches the consumer
//! under its lock, so once it returns no callback can run, then aborts the
//! driver; its session and poller abort their own tasks when dropped.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use crate::configs::{LiveFeedConfig, ResolvedConfig};
use crate::errors::FeedError;
use crate::feed::handler::FeedHandler;
use crate::feed::machine::{Effect, FeedEvent, FeedMachine, Token};
use crate::feed::payload::DataSnapshot;
use crate::feed::polling::{HttpPoller, PollRequest, PollingFallback, SnapshotFetcher};
use crate::feed::session::{SseTransport, StreamRequest, StreamSession, StreamTransport};
use crate::feed::state::ConnectionState;

type ConsumerSlot = Arc<Mutex<Option<Box<dyn FeedHandler>>>>;

#[derive(Debug)]
enum Command {
    Retry,
    Disconnect,
}

/// One live feed, owned by one screen.
pub struct LiveFeedClient {
    commands: mpsc::UnboundedSender<Command>,
    consumer: ConsumerSlot,
    status: watch::Receiver<ConnectionState>,
    latest: watch::Receiver<Option<DataSnapshot>>,
    attempts: Arc<AtomicU32>,
    driver: Option<JoinHandle<()>>,
}

impl LiveFeedClient {
    /// Connects over SSE with HTTP polling as the fallback.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns a `FeedError` if the configuration is invalid or the HTTP
    /// clients cannot be built. Nothing after this point is reported as an error.
    pub fn connect<H: FeedHandler>(config: &LiveFeedConfig, handler: H) -> Result<Self, FeedError> {
        let transport: Arc<dyn StreamTransport> = Arc::new(SseTransport::new()?);
        let fetcher: Arc<dyn SnapshotFetcher> = Arc::new(HttpPoller::new()?);
        Self::connect_with(config, transport, fetcher, handler)
    }

    /// Connects with caller-supplied transports.
    ///
    /// # Errors
    /// Returns a `FeedError` if the configuration is invalid.
    pub fn connect_with<H: FeedHandler>(
        config: &LiveFeedConfig,
        transport: Arc<dyn StreamTransport>,
        fetcher: Arc<dyn SnapshotFetcher>,
        handler: H,
    ) -> Result<Self, FeedError> {
        let resolved = config.validate()?;
        let (stream_request, poll_request) = requests(&resolved);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionState::Idle);
        let (latest_tx, latest_rx) = watch::channel(None);
        let handler: Box<dyn FeedHandler> = Box::new(handler);
        let consumer: ConsumerSlot = Arc::new(Mutex::new(Some(handler)));
        let attempts = Arc::new(AtomicU32::new(0));

        let driver = Driver {
            machine: FeedMachine::new(resolved.policy),
            transport,
            fetcher,
            stream_request,
            poll_request,
            commands: commands_rx,
            events_tx,
            events_rx,
            session: StreamSession::default(),
            reconnect: ReconnectTimer::default(),
            polling: PollingFallback::default(),
            consumer: Arc::clone(&consumer),
            status_tx,
            latest_tx,
            attempts: Arc::clone(&attempts),
        };

        Ok(Self {
            commands: commands_tx,
            consumer,
            status: status_rx,
            latest: latest_rx,
            attempts,
            driver: Some(tokio::spawn(driver.run())),
        })
    }

    /// Resets the retry budget and opens a new stream immediately, whatever
    /// the current state.
    pub fn retry(&self) {
        if self.commands.send(Command::Retry).is_err() {
            log::debug!("Retry ignored: feed driver has stopped.");
        }
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// The most recent snapshot, from either the stream or the poller.
    pub fn latest(&self) -> Option<DataSnapshot> {
        self.latest.borrow().clone()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Stops everything. No callback runs after this returns.
    pub fn disconnect(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let mut slot = self.consumer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.take().is_none() {
            return;
        }
        drop(slot);

        let _ = self.commands.send(Command::Disconnect);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl Drop for LiveFeedClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn requests(resolved: &ResolvedConfig) -> (StreamRequest, PollRequest) {
    let stream = StreamRequest {
        url: resolved.stream_url.clone(),
        headers: resolved.headers.clone(),
        idle_timeout: resolved.idle_timeout,
    };

    let mut poll_headers = resolved.headers.clone();
    if resolved.poll_uses_stream_url {
        poll_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    }
    let poll = PollRequest {
        url: resolved.poll_url.clone(),
        headers: poll_headers,
    };

    (stream, poll)
}

/// The one pending reconnect.
#[derive(Default)]
struct ReconnectTimer {
    pending: Option<(Token, Pin<Box<Sleep>>)>,
}

impl ReconnectTimer {
    fn schedule(&mut self, token: Token, delay: Duration) {
        self.pending = Some((token, Box::pin(tokio::time::sleep(delay))));
    }

    fn cancel(&mut self, token: Token) {
        if matches!(&self.pending, Some((pending, _)) if *pending == token) {
            self.pending = None;
        }
    }

    /// Resolves once when the timer elapses; never while nothing is pending.
    async fn due(&mut self) -> Token {
        match &mut self.pending {
            Some((token, sleep)) => {
                sleep.as_mut().await;
                let token = *token;
                self.pending = None;
                token
            }
            None => std::future::pending().await,
        }
    }
}

struct Driver {
    machine: FeedMachine,
    transport: Arc<dyn StreamTransport>,
    fetcher: Arc<dyn SnapshotFetcher>,
    stream_request: StreamRequest,
    poll_request: PollRequest,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<FeedEvent>,
    events_rx: mpsc::UnboundedReceiver<FeedEvent>,
    session: StreamSession,
    reconnect: ReconnectTimer,
    polling: PollingFallback,
    consumer: ConsumerSlot,
    status_tx: watch::Sender<ConnectionState>,
    latest_tx: watch::Sender<Option<DataSnapshot>>,
    attempts: Arc<AtomicU32>,
}

impl Driver {
    async fn run(mut self) {
        let mut next = Some(FeedEvent::Connect);

        loop {
            let event = match next.take() {
                Some(event) => event,
                None => tokio::select! {
                    command = self.commands.recv() => match command {
                        Some(Command::Retry) => FeedEvent::Retry,
                        Some(Command::Disconnect) | None => FeedEvent::Disconnect,
                    },
                    Some(event) = self.events_rx.recv() => event,
                    token = self.reconnect.due() => FeedEvent::ReconnectDue(token),
                    token = self.polling.tick() => FeedEvent::PollTick(token),
                },
            };

            let effects = self.machine.handle(event);
            self.apply(effects);

            if self.machine.is_terminated() {
                break;
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::OpenStream(token) => {
                    self.session
                        .open(token, &self.transport, &self.stream_request, &self.events_tx)
                }
                Effect::CloseStream(token) => self.session.close(token),
                Effect::ScheduleReconnect(token, delay) => self.reconnect.schedule(token, delay),
                Effect::CancelReconnect(token) => self.reconnect.cancel(token),
                Effect::StartPolling(token, period) => self.polling.start(token, period),
                Effect::StopPolling(token) => self.polling.stop(token),
                Effect::Fetch(token) => {
                    self.polling
                        .fetch(token, &self.fetcher, &self.poll_request, &self.events_tx)
                }
                Effect::Deliver(snapshot) => {
                    self.latest_tx.send_replace(Some(snapshot.clone()));
                    self.notify(|consumer| consumer.on_data(snapshot));
                }
                Effect::Status(state) => {
                    self.status_tx.send_replace(state);
                    self.notify(|consumer| consumer.on_status_change(state));
                }
            }
        }
        self.attempts
            .store(self.machine.retry().attempt_count(), Ordering::Relaxed);
    }

    fn notify(&self, deliver: impl FnOnce(&mut Box<dyn FeedHandler>)) {
        let mut slot = self.consumer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(consumer) = slot.as_mut() {
            deliver(consumer);
        }
    }
}
