//! A console stand-in for a data screen: one status line per change and one
//! block per snapshot.

use lib_livefeed::feed::{ConnectionState, DataSnapshot, FeedHandler, SnapshotSource};

#[derive(Debug, Default)]
pub struct Screen {
    snapshots: u64,
}

impl FeedHandler for Screen {
    fn on_data(&mut self, snapshot: DataSnapshot) {
        self.snapshots += 1;
        println!("{}", render_snapshot(self.snapshots, &snapshot));
    }

    fn on_status_change(&mut self, state: ConnectionState) {
        log::debug!("Feed status changed to {:?}", state);
        println!("{}", render_status(state));
    }
}

pub fn render_status(state: ConnectionState) -> String {
    if state.offers_retry() {
        format!("[{}] press Enter to retry now", state.label())
    } else {
        format!("[{}]", state.label())
    }
}

pub fn render_snapshot(seq: u64, snapshot: &DataSnapshot) -> String {
    let via = match snapshot.source {
        SnapshotSource::Stream => "stream",
        SnapshotSource::Poll => "poll",
    };
    let body = serde_json::to_string_pretty(&snapshot.data).unwrap_or_else(|_| snapshot.data.to_string());
    format!(
        "#{} {} via {} ({})\n{}",
        seq,
        snapshot.received_at.with_timezone(&chrono::Local).format("%H:%M:%S"),
        via,
        snapshot.field.key(),
        body
    )
}
