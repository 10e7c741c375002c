//! Connection status and retry bookkeeping.

use std::fmt;

/// The single source of truth for what a live feed is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Nothing opened yet.
    Idle,
    /// A stream is being opened, or the transport reported benign noise.
    Connecting,
    /// The stream is open and delivering.
    Connected,
    /// A genuine failure; a reconnect is pending.
    Error,
    /// Streaming abandoned; the polling fallback is active.
    Fallback,
}

impl ConnectionState {
    /// Short status text for display next to live data.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Offline",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Live",
            ConnectionState::Error => "Reconnecting",
            ConnectionState::Fallback => "Backup Mode",
        }
    }

    /// Whether a manual "Retry" control makes sense in this state.
    pub fn offers_retry(&self) -> bool {
        matches!(self, ConnectionState::Error | ConnectionState::Fallback)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reconnect attempts made since the last successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt_count: u32,
    ceiling: u32,
}

impl RetryState {
    pub fn new(ceiling: u32) -> Self {
        Self {
            attempt_count: 0,
            ceiling,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn exhausted(&self) -> bool {
        self.attempt_count >= self.ceiling
    }

    pub fn record_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.attempt_count = 0;
    }
}
