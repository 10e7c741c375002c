//! # Error Classifier
//!
//! Streaming transports produce their own low-level noise: keep-alive
//! timeouts, notices that they are re-establishing a connection by themselves.
//! Surfacing those as failures would show the user a spurious error and burn
//! the bounded retry budget, so every transport error is classified first.
//!
//! Transports are expected to tag errors with an explicit [`TransportErrorKind`].
//! Errors tagged `Unknown` (e.g. wrapped from a third-party client) go through
//! a phrase-matching heuristic; anything it does not recognise counts as a
//! genuine failure so the client never hangs on an unclassified error.

use std::fmt;
use std::time::Duration;

/// Phrases that mark an untagged error as transport noise. Matched case-insensitively.
const TRANSIENT_PHRASES: &[&str] = &["keep-alive timeout", "keepalive timeout", "reconnecting"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// No bytes for the configured idle period; the connection may still be fine.
    KeepAliveTimeout,
    /// The transport is re-establishing the connection on its own.
    Reconnecting,
    /// The connection could not be established.
    Connect,
    /// The server answered with a non-success status.
    Status(u16),
    /// The byte stream failed mid-flight.
    Stream,
    /// The server closed the stream.
    StreamEnded,
    /// Not tagged by the transport.
    Unknown,
}

/// An error reported by a stream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn keep_alive_timeout(idle: Duration) -> Self {
        Self::new(
            TransportErrorKind::KeepAliveTimeout,
            format!("keep-alive timeout after {}ms of silence", idle.as_millis()),
        )
    }

    pub fn stream_ended() -> Self {
        Self::new(TransportErrorKind::StreamEnded, "stream closed by server")
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Outcome of classifying a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Benign noise: keep waiting on the current connection.
    Transient,
    /// A real failure: count it and back off.
    Failure,
}

pub fn classify(error: &TransportError) -> ErrorClass {
    match error.kind {
        TransportErrorKind::KeepAliveTimeout | TransportErrorKind::Reconnecting => {
            ErrorClass::Transient
        }
        TransportErrorKind::Connect
        | TransportErrorKind::Status(_)
        | TransportErrorKind::Stream
        | TransportErrorKind::StreamEnded => ErrorClass::Failure,
        TransportErrorKind::Unknown => classify_message(&error.message),
    }
}

fn classify_message(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();
    if TRANSIENT_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Failure
    }
}
