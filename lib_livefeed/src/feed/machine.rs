//! # Feed State Machine
//!
//! All decisions of the live feed live here, free of I/O and timers: the
//! driver feeds one [`FeedEvent`] at a time and carries out the returned
//! [`Effect`]s in order. This keeps every transition testable with simulated
//! time.
//!
//! ## Invariants
//! - Exactly one data-acquisition [`Mode`] is active: an open stream, a pending
//!   reconnect, or a polling interval. Whatever was active is cancelled before
//!   anything new starts.
//! - Every session and timer carries a fresh [`Token`]. Events bearing any
//!   other token are stale and ignored, so a late timer or a message from a
//!   closed session can never act.
//! - After `Disconnect` the machine is terminated and ignores everything.

use std::time::Duration;

use crate::configs::RetryPolicy;
use crate::feed::backoff::{self, BackoffDecision};
use crate::feed::classifier::{self, ErrorClass, TransportError};
use crate::feed::payload::{self, DataSnapshot, SnapshotSource};
use crate::feed::state::{ConnectionState, RetryState};

/// Identifies one stream session or one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Inactive,
    Streaming(Token),
    Waiting(Token),
    Polling(Token),
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The owning screen mounted the feed.
    Connect,
    /// The transport confirmed the session is live.
    Opened(Token),
    /// Raw payload of one stream event.
    Message(Token, String),
    /// The transport reported an error on the session.
    Failed(Token, TransportError),
    /// A scheduled reconnect timer elapsed.
    ReconnectDue(Token),
    /// The polling interval ticked.
    PollTick(Token),
    /// A polling fetch finished.
    Polled(Token, Result<String, String>),
    /// Manual retry from the screen.
    Retry,
    /// The owning screen unmounted.
    Disconnect,
}

/// Actions the driver must perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenStream(Token),
    CloseStream(Token),
    ScheduleReconnect(Token, Duration),
    CancelReconnect(Token),
    StartPolling(Token, Duration),
    StopPolling(Token),
    Fetch(Token),
    Deliver(DataSnapshot),
    Status(ConnectionState),
}

#[derive(Debug)]
pub struct FeedMachine {
    policy: RetryPolicy,
    state: ConnectionState,
    retry: RetryState,
    mode: Mode,
    next_token: u64,
    terminated: bool,
}

impl FeedMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Idle,
            retry: RetryState::new(policy.max_attempts),
            mode: Mode::Inactive,
            next_token: 0,
            terminated: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry(&self) -> RetryState {
        self.retry
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn stream_open(&self) -> bool {
        matches!(self.mode, Mode::Streaming(_))
    }

    pub fn reconnect_pending(&self) -> bool {
        matches!(self.mode, Mode::Waiting(_))
    }

    pub fn polling_active(&self) -> bool {
        matches!(self.mode, Mode::Polling(_))
    }

    pub fn handle(&mut self, event: FeedEvent) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.terminated {
            log::trace!("Feed terminated; ignoring {:?}", event);
            return fx;
        }

        match event {
            FeedEvent::Connect => {
                if self.mode == Mode::Inactive && self.state == ConnectionState::Idle {
                    self.open_stream(&mut fx);
                } else {
                    log::warn!("Connect ignored: feed is already active ({:?}).", self.state);
                }
            }
            FeedEvent::Opened(token) if self.is_session(token) => {
                log::info!("Live feed stream opened.");
                self.retry.reset();
                self.set_state(ConnectionState::Connected, &mut fx);
            }
            FeedEvent::Message(token, raw) if self.is_session(token) => {
                match payload::parse_snapshot(&raw, SnapshotSource::Stream) {
                    Ok(snapshot) => {
                        fx.push(Effect::Deliver(snapshot));
                        self.set_state(ConnectionState::Connected, &mut fx);
                    }
                    Err(reason) => log::debug!("Discarding stream message: {:?}", reason),
                }
            }
            FeedEvent::Failed(token, error) if self.is_session(token) => {
                self.on_stream_error(token, error, &mut fx);
            }
            FeedEvent::ReconnectDue(token) if self.mode == Mode::Waiting(token) => {
                self.mode = Mode::Inactive;
                self.retry.record_attempt();
                log::info!(
                    "Reconnecting (attempt {}/{}).",
                    self.retry.attempt_count(),
                    self.retry.ceiling()
                );
                self.open_stream(&mut fx);
            }
            FeedEvent::PollTick(token) if self.mode == Mode::Polling(token) => {
                fx.push(Effect::Fetch(token));
            }
            FeedEvent::Polled(token, result) if self.mode == Mode::Polling(token) => match result {
                Ok(body) => match payload::parse_snapshot(&body, SnapshotSource::Poll) {
                    Ok(snapshot) => fx.push(Effect::Deliver(snapshot)),
                    Err(reason) => log::debug!("Discarding poll response: {:?}", reason),
                },
                Err(e) => log::warn!("Polling fetch failed: {}. Retrying on next tick.", e),
            },
            FeedEvent::Retry => {
                log::info!("Manual retry requested from {:?}.", self.state);
                self.cancel_active(&mut fx);
                self.retry.reset();
                self.open_stream(&mut fx);
            }
            FeedEvent::Disconnect => {
                self.cancel_active(&mut fx);
                self.terminated = true;
                log::debug!("Live feed disconnected.");
            }
            stale => log::trace!("Ignoring stale event {:?}", stale),
        }

        fx
    }

    fn on_stream_error(&mut self, token: Token, error: TransportError, fx: &mut Vec<Effect>) {
        match classifier::classify(&error) {
            ErrorClass::Transient => {
                log::debug!("Transient stream noise: {}", error);
                self.set_state(ConnectionState::Connecting, fx);
            }
            ErrorClass::Failure => {
                log::warn!("Stream failed: {}", error);
                self.set_state(ConnectionState::Error, fx);
                fx.push(Effect::CloseStream(token));
                self.mode = Mode::Inactive;
                self.schedule_or_fallback(fx);
            }
        }
    }

    fn schedule_or_fallback(&mut self, fx: &mut Vec<Effect>) {
        self.cancel_active(fx);
        match backoff::decide(&self.policy, &self.retry) {
            BackoffDecision::Reconnect(delay) => {
                let token = self.token();
                log::info!(
                    "Reconnect {}/{} scheduled in {}ms.",
                    self.retry.attempt_count() + 1,
                    self.retry.ceiling(),
                    delay.as_millis()
                );
                self.mode = Mode::Waiting(token);
                fx.push(Effect::ScheduleReconnect(token, delay));
            }
            BackoffDecision::Fallback => {
                log::warn!(
                    "Retry budget of {} exhausted; switching to polling every {}s.",
                    self.retry.ceiling(),
                    self.policy.poll_interval().as_secs()
                );
                self.set_state(ConnectionState::Fallback, fx);
                let token = self.token();
                self.mode = Mode::Polling(token);
                fx.push(Effect::StartPolling(token, self.policy.poll_interval()));
            }
        }
    }

    fn open_stream(&mut self, fx: &mut Vec<Effect>) {
        let token = self.token();
        self.mode = Mode::Streaming(token);
        self.set_state(ConnectionState::Connecting, fx);
        fx.push(Effect::OpenStream(token));
    }

    fn cancel_active(&mut self, fx: &mut Vec<Effect>) {
        match self.mode {
            Mode::Inactive => {}
            Mode::Streaming(token) => fx.push(Effect::CloseStream(token)),
            Mode::Waiting(token) => fx.push(Effect::CancelReconnect(token)),
            Mode::Polling(token) => fx.push(Effect::StopPolling(token)),
        }
        self.mode = Mode::Inactive;
    }

    fn set_state(&mut self, state: ConnectionState, fx: &mut Vec<Effect>) {
        if self.state != state {
            self.state = state;
            fx.push(Effect::Status(state));
        }
    }

    fn is_session(&self, token: Token) -> bool {
        self.mode == Mode::Streaming(token)
    }

    fn token(&mut self) -> Token {
        self.next_token += 1;
        Token(self.next_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::classifier::TransportErrorKind;
    use std::collections::HashSet;

    const OK: &str = r#"{"success":true,"data":{"winners":[]}}"#;

    /// Mirrors what the driver would have running, built only from effects.
    #[derive(Default)]
    struct Harness {
        streams: HashSet<Token>,
        reconnects: HashSet<Token>,
        polls: HashSet<Token>,
        delivered: usize,
        statuses: Vec<ConnectionState>,
        delays: Vec<Duration>,
    }

    impl Harness {
        fn apply(&mut self, effects: Vec<Effect>) {
            for effect in effects {
                match effect {
                    Effect::OpenStream(t) => assert!(self.streams.insert(t)),
                    Effect::CloseStream(t) => assert!(self.streams.remove(&t)),
                    Effect::ScheduleReconnect(t, d) => {
                        assert!(self.reconnects.insert(t));
                        self.delays.push(d);
                    }
                    Effect::CancelReconnect(t) => assert!(self.reconnects.remove(&t)),
                    Effect::StartPolling(t, _) => assert!(self.polls.insert(t)),
                    Effect::StopPolling(t) => assert!(self.polls.remove(&t)),
                    Effect::Fetch(t) => assert!(self.polls.contains(&t)),
                    Effect::Deliver(_) => self.delivered += 1,
                    Effect::Status(s) => self.statuses.push(s),
                }
            }
            let active = self.streams.len() + self.reconnects.len() + self.polls.len();
            assert!(active <= 1, "overlapping acquisition modes: {active}");
        }

        fn only_stream(&self) -> Token {
            assert_eq!(self.streams.len(), 1);
            *self.streams.iter().next().unwrap()
        }

        fn only_reconnect(&self) -> Token {
            assert_eq!(self.reconnects.len(), 1);
            *self.reconnects.iter().next().unwrap()
        }

        fn only_poll(&self) -> Token {
            assert_eq!(self.polls.len(), 1);
            *self.polls.iter().next().unwrap()
        }
    }

    fn refused() -> TransportError {
        TransportError::new(TransportErrorKind::Connect, "connection refused")
    }

    fn step(m: &mut FeedMachine, h: &mut Harness, event: FeedEvent) {
        let fx = m.handle(event);
        h.apply(fx);
    }

    /// Fails the current session and lets the resulting reconnect timer fire.
    fn fail_and_wait(m: &mut FeedMachine, h: &mut Harness) {
        let session = h.only_stream();
        step(m, h, FeedEvent::Failed(session, refused()));
        if m.reconnect_pending() {
            let timer = h.only_reconnect();
            h.reconnects.remove(&timer);
            step(m, h, FeedEvent::ReconnectDue(timer));
        }
    }

    fn connected() -> (FeedMachine, Harness) {
        let mut m = FeedMachine::new(RetryPolicy::default());
        let mut h = Harness::default();
        step(&mut m, &mut h, FeedEvent::Connect);
        let session = h.only_stream();
        step(&mut m, &mut h, FeedEvent::Opened(session));
        (m, h)
    }

    #[test]
    fn connect_opens_and_open_confirms_live() {
        let (m, h) = connected();
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(
            h.statuses,
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[test]
    fn second_connect_is_ignored() {
        let (mut m, h) = connected();
        let session = h.only_stream();
        assert!(m.handle(FeedEvent::Connect).is_empty());
        assert!(m.stream_open());
        assert_eq!(h.only_stream(), session);
    }

    #[test]
    fn backoff_delays_double_per_attempt() {
        let mut m = FeedMachine::new(RetryPolicy::default());
        let mut h = Harness::default();
        step(&mut m, &mut h, FeedEvent::Connect);
        for _ in 0..5 {
            fail_and_wait(&mut m, &mut h);
        }
        let ms: Vec<u128> = h.delays.iter().map(Duration::as_millis).collect();
        assert_eq!(ms, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
    }

    #[test]
    fn fallback_after_five_failed_reconnects() {
        let mut m = FeedMachine::new(RetryPolicy::default());
        let mut h = Harness::default();
        step(&mut m, &mut h, FeedEvent::Connect);

        // the initial open plus five reconnect attempts all fail
        for attempt in 0..5 {
            fail_and_wait(&mut m, &mut h);
            assert_eq!(m.retry().attempt_count(), attempt + 1);
            assert_ne!(m.state(), ConnectionState::Fallback);
        }
        let session = h.only_stream();
        step(&mut m, &mut h, FeedEvent::Failed(session, refused()));

        assert_eq!(m.state(), ConnectionState::Fallback);
        assert!(m.polling_active());
        assert_eq!(h.statuses.last(), Some(&ConnectionState::Fallback));
        assert_eq!(h.delays.len(), 5);

        // polling has no ceiling and never schedules another reconnect
        let poll = h.only_poll();
        for _ in 0..20 {
            step(&mut m, &mut h, FeedEvent::PollTick(poll));
            step(&mut m, &mut h, FeedEvent::Polled(poll, Err("503".into())));
        }
        assert_eq!(h.delays.len(), 5);
        assert_eq!(m.state(), ConnectionState::Fallback);
    }

    #[test]
    fn failure_reports_error_then_connecting() {
        let (mut m, mut h) = connected();
        h.statuses.clear();
        fail_and_wait(&mut m, &mut h);
        assert_eq!(
            h.statuses,
            vec![ConnectionState::Error, ConnectionState::Connecting]
        );
    }

    #[test]
    fn successful_open_resets_backoff() {
        let (mut m, mut h) = connected();
        for _ in 0..3 {
            fail_and_wait(&mut m, &mut h);
        }
        assert_eq!(m.retry().attempt_count(), 3);

        let session = h.only_stream();
        step(&mut m, &mut h, FeedEvent::Opened(session));
        assert_eq!(m.retry().attempt_count(), 0);

        h.delays.clear();
        let session = h.only_stream();
        step(&mut m, &mut h, FeedEvent::Failed(session, refused()));
        assert_eq!(h.delays, vec![Duration::from_secs(1)]);
    }

    #[test]
    fn transient_noise_keeps_session_and_budget() {
        let (mut m, mut h) = connected();
        let session = h.only_stream();
        step(
            &mut m,
            &mut h,
            FeedEvent::Failed(session, TransportError::keep_alive_timeout(Duration::from_secs(45))),
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(h.only_stream(), session);
        assert!(h.delays.is_empty());
        assert_eq!(m.retry().attempt_count(), 0);

        step(&mut m, &mut h, FeedEvent::Message(session, OK.into()));
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn malformed_message_is_isolated() {
        let (mut m, mut h) = connected();
        let session = h.only_stream();
        h.statuses.clear();

        step(&mut m, &mut h, FeedEvent::Message(session, "{not json".into()));
        step(&mut m, &mut h, FeedEvent::Message(session, OK.into()));

        assert_eq!(h.delivered, 1);
        assert!(h.statuses.is_empty());
        assert!(m.stream_open());
    }

    #[test]
    fn messages_are_delivered_in_order() {
        let (mut m, _) = connected();
        let session = Token(1);
        let first = m.handle(FeedEvent::Message(session, r#"{"success":true,"data":1}"#.into()));
        let second = m.handle(FeedEvent::Message(session, r#"{"success":true,"data":2}"#.into()));
        let values: Vec<_> = first
            .into_iter()
            .chain(second)
            .filter_map(|fx| match fx {
                Effect::Deliver(s) => Some(s.data),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![serde_json::json!(1), serde_json::json!(2)]);
    }

    #[test]
    fn interleaved_stale_events_never_overlap_modes() {
        let (mut m, mut h) = connected();
        let old_session = h.only_stream();
        step(&mut m, &mut h, FeedEvent::Failed(old_session, refused()));
        let timer = h.only_reconnect();

        // rapid repeated errors and messages from the dead session change nothing
        for _ in 0..3 {
            step(&mut m, &mut h, FeedEvent::Failed(old_session, refused()));
            step(&mut m, &mut h, FeedEvent::Message(old_session, OK.into()));
            step(&mut m, &mut h, FeedEvent::Opened(old_session));
        }
        assert_eq!(h.delivered, 0);
        assert_eq!(h.delays.len(), 1);

        h.reconnects.remove(&timer);
        step(&mut m, &mut h, FeedEvent::ReconnectDue(timer));
        // a duplicate firing of the same timer is stale
        step(&mut m, &mut h, FeedEvent::ReconnectDue(timer));
        assert!(m.stream_open());

        // manual retry while a reconnect is pending cancels the timer first
        let session = h.only_stream();
        step(&mut m, &mut h, FeedEvent::Failed(session, refused()));
        assert!(m.reconnect_pending());
        step(&mut m, &mut h, FeedEvent::Retry);
        assert!(m.stream_open());
        assert!(h.reconnects.is_empty());
    }

    #[test]
    fn disconnect_is_terminal() {
        let (mut m, mut h) = connected();
        let session = h.only_stream();
        step(&mut m, &mut h, FeedEvent::Failed(session, refused()));
        let timer = h.only_reconnect();

        step(&mut m, &mut h, FeedEvent::Disconnect);
        assert!(h.reconnects.is_empty());
        assert!(m.is_terminated());

        for event in [
            FeedEvent::ReconnectDue(timer),
            FeedEvent::Opened(session),
            FeedEvent::Message(session, OK.into()),
            FeedEvent::Retry,
            FeedEvent::Connect,
        ] {
            assert!(m.handle(event).is_empty());
        }
    }

    #[test]
    fn disconnect_stops_polling() {
        let mut m = FeedMachine::new(RetryPolicy::default());
        let mut h = Harness::default();
        step(&mut m, &mut h, FeedEvent::Connect);
        for _ in 0..6 {
            fail_and_wait(&mut m, &mut h);
        }
        let poll = h.only_poll();
        step(&mut m, &mut h, FeedEvent::Disconnect);
        assert!(h.polls.is_empty());
        assert!(m.handle(FeedEvent::PollTick(poll)).is_empty());
    }

    #[test]
    fn polling_delivers_snapshots_without_status_changes() {
        let mut m = FeedMachine::new(RetryPolicy::default());
        let mut h = Harness::default();
        step(&mut m, &mut h, FeedEvent::Connect);
        for _ in 0..6 {
            fail_and_wait(&mut m, &mut h);
        }
        let poll = h.only_poll();
        h.statuses.clear();

        step(&mut m, &mut h, FeedEvent::PollTick(poll));
        step(&mut m, &mut h, FeedEvent::Polled(poll, Ok(OK.into())));
        step(&mut m, &mut h, FeedEvent::Polled(poll, Ok("garbage".into())));
        step(&mut m, &mut h, FeedEvent::Polled(poll, Err("timeout".into())));

        assert_eq!(h.delivered, 1);
        assert!(h.statuses.is_empty());
    }

    #[test]
    fn manual_retry_from_fallback_restarts_streaming() {
        let mut m = FeedMachine::new(RetryPolicy::default());
        let mut h = Harness::default();
        step(&mut m, &mut h, FeedEvent::Connect);
        for _ in 0..6 {
            fail_and_wait(&mut m, &mut h);
        }
        assert_eq!(m.state(), ConnectionState::Fallback);
        let poll = h.only_poll();

        let fx = m.handle(FeedEvent::Retry);
        assert_eq!(fx[0], Effect::StopPolling(poll));
        assert!(matches!(fx.last(), Some(Effect::OpenStream(_))));
        h.apply(fx);
        assert_eq!(m.retry().attempt_count(), 0);
        assert_eq!(m.state(), ConnectionState::Connecting);

        let session = h.only_stream();
        step(&mut m, &mut h, FeedEvent::Opened(session));
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(m.retry().attempt_count(), 0);

        // late results from the stopped poller are ignored
        assert!(m.handle(FeedEvent::Polled(poll, Ok(OK.into()))).is_empty());
    }

    #[test]
    fn stream_closed_before_polling_starts() {
        let mut m = FeedMachine::new(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        });
        let mut h = Harness::default();
        step(&mut m, &mut h, FeedEvent::Connect);
        let session = h.only_stream();
        let fx = m.handle(FeedEvent::Failed(session, refused()));
        let close = fx.iter().position(|e| *e == Effect::CloseStream(session));
        let start = fx.iter().position(|e| matches!(e, Effect::StartPolling(..)));
        assert!(close.unwrap() < start.unwrap());
    }
}
