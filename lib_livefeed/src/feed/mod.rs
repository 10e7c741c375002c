//! The Live Feed Client and the parts it is built from.
//!
//! [`machine`] holds every decision and is pure; [`client`] owns the tasks and
//! timers and applies the machine's effects. The remaining modules are the
//! building blocks both of them share.

pub mod backoff;
pub mod classifier;
pub mod client;
pub mod handler;
pub mod machine;
pub mod payload;
pub mod polling;
pub mod session;
pub mod sse;
pub mod state;

pub use backoff::{backoff_delay, BackoffDecision};
pub use classifier::{classify, ErrorClass, TransportError, TransportErrorKind};
pub use client::LiveFeedClient;
pub use handler::{ChannelHandler, FeedHandler, FeedUpdate, FnHandler};
pub use payload::{DataSnapshot, Discarded, SnapshotField, SnapshotSource};
pub use polling::{HttpPoller, PollRequest, SnapshotFetcher};
pub use session::{SseTransport, StreamRequest, StreamTransport, TransportEvent};
pub use state::{ConnectionState, RetryState};
