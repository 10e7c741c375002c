//! Envelope decoding for stream events and poll responses.
//!
//! Both carry the same shape: `{ "success": bool, "data" | "results" | "userData": <any> }`.
//! The payload itself is opaque to the client and handed to the consumer as-is.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Which envelope key the payload was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotField {
    Data,
    Results,
    UserData,
}

impl SnapshotField {
    pub fn key(&self) -> &'static str {
        match self {
            SnapshotField::Data => "data",
            SnapshotField::Results => "results",
            SnapshotField::UserData => "userData",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Stream,
    Poll,
}

/// One decoded unit of server data. Each snapshot replaces the previous one.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSnapshot {
    pub field: SnapshotField,
    pub data: Value,
    pub source: SnapshotSource,
    pub received_at: DateTime<Utc>,
}

/// Why a raw payload was not turned into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discarded {
    /// Not JSON, or not an object with a boolean `success`.
    Malformed(String),
    /// `success` was `false`.
    Unsuccessful,
    /// `success` was `true` but none of the payload keys were present.
    Empty,
}

#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    results: Option<Value>,
    #[serde(default, rename = "userData")]
    user_data: Option<Value>,
}

/// Decodes one raw payload. When several payload keys are present,
/// `data` wins over `results`, which wins over `userData`.
pub fn parse_snapshot(raw: &str, source: SnapshotSource) -> Result<DataSnapshot, Discarded> {
    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|e| Discarded::Malformed(e.to_string()))?;

    if !envelope.success {
        return Err(Discarded::Unsuccessful);
    }

    let (field, data) = match (envelope.data, envelope.results, envelope.user_data) {
        (Some(data), _, _) => (SnapshotField::Data, data),
        (None, Some(results), _) => (SnapshotField::Results, results),
        (None, None, Some(user)) => (SnapshotField::UserData, user),
        (None, None, None) => return Err(Discarded::Empty),
    };

    Ok(DataSnapshot {
        field,
        data,
        source,
        received_at: Utc::now(),
    })
}
