//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary chunks; the decoder buffers partial lines and
//! emits an [`SseEvent`] each time a blank line terminates a block that
//! carried at least one `data:` field.

use thiserror::Error;

/// Upper bound for undispatched bytes: the current line plus buffered `data:` lines.
pub const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// `event:` field, `None` for the default "message" type.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Whether this is a plain message, as opposed to a named event.
    pub fn is_message(&self) -> bool {
        !matches!(self.event.as_deref(), Some(name) if name != "message")
    }
}

/// The server kept sending without ever completing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event exceeds {limit} bytes without a line break or blank line")]
pub struct Oversized {
    pub limit: usize,
}

/// `id:` and `retry:` fields are recognised and ignored: reconnect timing
/// belongs to the feed's own backoff policy.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // A '\r' ended the previous chunk; a leading '\n' in the next one belongs to it.
    pending_cr: bool,
    event: Option<String>,
    data: Vec<String>,
    data_bytes: usize,
    limit: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            pending_cr: false,
            event: None,
            data: Vec::new(),
            data_bytes: 0,
            limit,
        }
    }

    /// Feeds a chunk and returns every event completed by it, in order.
    ///
    /// # Errors
    /// Returns [`Oversized`] once the undispatched input exceeds the limit;
    /// the decoder should then be discarded along with its stream.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, Oversized> {
        let mut events = Vec::new();
        let mut bytes = chunk;

        if self.pending_cr {
            self.pending_cr = false;
            if let Some((b'\n', rest)) = bytes.split_first() {
                bytes = rest;
            }
        }

        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => {
                    self.buffer.extend_from_slice(&bytes[start..i]);
                    self.take_line(&mut events);
                    start = i + 1;
                }
                b'\r' => {
                    self.buffer.extend_from_slice(&bytes[start..i]);
                    self.take_line(&mut events);
                    if i + 1 < bytes.len() {
                        if bytes[i + 1] == b'\n' {
                            i += 1;
                        }
                    } else {
                        self.pending_cr = true;
                    }
                    start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        self.buffer.extend_from_slice(&bytes[start..]);

        if self.buffer.len() + self.data_bytes > self.limit {
            return Err(Oversized { limit: self.limit });
        }
        Ok(events)
    }

    fn take_line(&mut self, events: &mut Vec<SseEvent>) {
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw);

        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };

        match field {
            "data" => {
                self.data_bytes += value.len() + 1;
                self.data.push(value.to_string());
            }
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        let event = self.event.take();
        self.data_bytes = 0;
        if self.data.is_empty() {
            return;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        events.push(SseEvent { event, data });
    }
}
