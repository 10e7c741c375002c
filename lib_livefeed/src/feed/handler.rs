//! The seam between the feed and the screen that owns it.

use tokio::sync::mpsc;

use crate::feed::payload::DataSnapshot;
use crate::feed::state::ConnectionState;

/// Receives everything a live feed has to say. Both methods run on the feed's
/// driver task and must not block.
///
/// They also run while the feed holds its consumer lock, so a handler must not
/// drop or disconnect the `LiveFeedClient` that owns it: that waits for the
/// same lock and deadlocks. Signal the owner instead (e.g. over a channel).
pub trait FeedHandler: Send + 'static {
    /// A fresh snapshot; it replaces, not extends, the previous one.
    fn on_data(&mut self, snapshot: DataSnapshot);

    /// The connection state changed. For display only.
    fn on_status_change(&mut self, state: ConnectionState);
}

/// A notification forwarded by [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Data(DataSnapshot),
    Status(ConnectionState),
}

/// Forwards notifications over an unbounded channel, for consumers that
/// prefer to `recv().await` instead of implementing callbacks.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<FeedUpdate>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FeedUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FeedHandler for ChannelHandler {
    fn on_data(&mut self, snapshot: DataSnapshot) {
        if self.tx.send(FeedUpdate::Data(snapshot)).is_err() {
            log::trace!("Feed update receiver dropped; snapshot discarded.");
        }
    }

    fn on_status_change(&mut self, state: ConnectionState) {
        if self.tx.send(FeedUpdate::Status(state)).is_err() {
            log::trace!("Feed update receiver dropped; status {:?} discarded.", state);
        }
    }
}

/// Adapts a pair of closures into a [`FeedHandler`].
pub struct FnHandler<D, S> {
    on_data: D,
    on_status: S,
}

impl<D, S> FnHandler<D, S>
where
    D: FnMut(DataSnapshot) + Send + 'static,
    S: FnMut(ConnectionState) + Send + 'static,
{
    pub fn new(on_data: D, on_status: S) -> Self {
        Self { on_data, on_status }
    }
}

impl<D, S> FeedHandler for FnHandler<D, S>
where
    D: FnMut(DataSnapshot) + Send + 'static,
    S: FnMut(ConnectionState) + Send + 'static,
{
    fn on_data(&mut self, snapshot: DataSnapshot) {
        (self.on_data)(snapshot)
    }

    fn on_status_change(&mut self, state: ConnectionState) {
        (self.on_status)(state)
    }
}
