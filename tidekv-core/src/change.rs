//! Change feed items and payload decoding.
//!
//! The log's change feed is ordered per partition and at-least-once. Each
//! item is either a payload-bearing row change or a payload-less checkpoint.
//! Payloads arrive as JSON in one of the shapes below:
//!
//! ```text
//! {"key":"k","value":"v","deleted":false,"timestamp":"..."}      bare row
//! {"after":{...row...},"updated":"1700000000000000000.0000000000"} wrapped row
//! {"after":null,"updated":"..."}                                   row removed by GC
//! {"resolved":"1700000000000000000.0000000000"}                    checkpoint
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChangeEventError;
use crate::record::LogRecord;
use crate::Timestamp;

/// Opaque resume position in the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedCursor(String);

impl FeedCursor {
    pub fn new(position: impl Into<String>) -> Self {
        Self(position.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One raw item delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Position of this item, when the feed reports one.
    pub cursor: Option<FeedCursor>,
    /// Serialized row change. `None` for checkpoints and heartbeats.
    pub payload: Option<String>,
}

impl ChangeEvent {
    pub fn data(payload: impl Into<String>, cursor: Option<FeedCursor>) -> Self {
        Self {
            cursor,
            payload: Some(payload.into()),
        }
    }

    pub fn checkpoint(cursor: Option<FeedCursor>) -> Self {
        Self {
            cursor,
            payload: None,
        }
    }

    /// Encode a committed record in the bare row shape.
    pub fn from_record(record: &LogRecord, cursor: Option<FeedCursor>) -> Self {
        let payload = serde_json::json!({
            "key": record.key,
            "value": record.value,
            "timestamp": record.timestamp,
            "deleted": record.deleted,
        });
        Self::data(payload.to_string(), cursor)
    }

    pub fn is_checkpoint(&self) -> bool {
        self.payload.is_none()
    }
}

/// A decoded row change, shaped like a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMessage {
    pub key: String,
    pub value: String,
    pub deleted: bool,
    /// Commit timestamp of the row. Older producers omit it.
    pub timestamp: Option<Timestamp>,
}

/// Result of decoding one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A row change to apply to the cache.
    Record {
        message: ChangeMessage,
        /// The row's `updated` position. Rows from other ranges may still
        /// arrive below it, so it is not a safe resume point.
        cursor: Option<FeedCursor>,
    },
    /// A resolved-timestamp checkpoint.
    Resolved(FeedCursor),
    /// The row was physically removed from the log. No cache effect.
    Retired { cursor: Option<FeedCursor> },
}

#[derive(Deserialize)]
struct RawRow {
    key: Option<String>,
    value: Option<String>,
    deleted: Option<bool>,
    timestamp: Option<Timestamp>,
}

fn malformed(reason: impl fmt::Display) -> ChangeEventError {
    ChangeEventError::Malformed {
        reason: reason.to_string(),
    }
}

impl ChangeMessage {
    /// Decode a change feed payload.
    pub fn decode(payload: &str) -> Result<Decoded, ChangeEventError> {
        let value: Value = serde_json::from_str(payload).map_err(malformed)?;
        let object = value
            .as_object()
            .ok_or_else(|| malformed("payload is not a JSON object"))?;

        if let Some(resolved) = object.get("resolved") {
            let position = resolved
                .as_str()
                .ok_or_else(|| malformed("resolved timestamp is not a string"))?;
            return Ok(Decoded::Resolved(FeedCursor::new(position)));
        }

        let cursor = object
            .get("updated")
            .and_then(Value::as_str)
            .map(FeedCursor::new);

        let row = match object.get("after") {
            Some(Value::Null) => return Ok(Decoded::Retired { cursor }),
            Some(after) => after.clone(),
            None => value.clone(),
        };

        let raw: RawRow = serde_json::from_value(row).map_err(malformed)?;
        let key = raw
            .key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| malformed("missing key"))?;

        Ok(Decoded::Record {
            message: ChangeMessage {
                key,
                value: raw.value.unwrap_or_default(),
                deleted: raw.deleted.unwrap_or(false),
                timestamp: raw.timestamp,
            },
            cursor,
        })
    }

    /// Rebuild the log record, when the payload carried its timestamp.
    pub fn to_record(&self) -> Option<LogRecord> {
        self.timestamp.map(|timestamp| LogRecord {
            key: self.key.clone(),
            value: if self.deleted {
                String::new()
            } else {
                self.value.clone()
            },
            timestamp,
            deleted: self.deleted,
        })
    }
}
