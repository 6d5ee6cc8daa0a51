//! Log records and the current-value reconstruction rule.
//!
//! The log is append-only. A key's current state is the record with the
//! greatest timestamp among all of that key's records; when that record is a
//! tombstone the key is absent. A tombstone still occupies its slot in the
//! key's history, so a later non-tombstone record brings the key back.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::Timestamp;

/// Longest key accepted by the write path, in bytes.
pub const MAX_KEY_LEN: usize = 1024;

/// A single immutable entry in the durable log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub key: String,
    /// Opaque payload. Always empty for tombstones.
    pub value: String,
    pub timestamp: Timestamp,
    pub deleted: bool,
}

impl LogRecord {
    /// Record that sets `key` to `value`.
    pub fn put(key: impl Into<String>, value: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
            deleted: false,
        }
    }

    /// Tombstone marking `key` as deleted.
    pub fn tombstone(key: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            timestamp,
            deleted: true,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }

    /// True if this record supersedes `other` for the same key.
    ///
    /// Equal timestamps do not supersede; ties are broken by log position,
    /// which only the store knows.
    pub fn supersedes(&self, other: &LogRecord) -> bool {
        self.timestamp > other.timestamp
    }
}

/// The reconstructed state of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentState {
    /// No record exists for the key.
    Absent,
    /// The newest record is a tombstone.
    Deleted(LogRecord),
    /// The newest record carries a value.
    Present(LogRecord),
}

impl CurrentState {
    /// Classify the newest record for a key (or its absence).
    pub fn from_latest(latest: Option<LogRecord>) -> Self {
        match latest {
            None => CurrentState::Absent,
            Some(record) if record.deleted => CurrentState::Deleted(record),
            Some(record) => CurrentState::Present(record),
        }
    }

    /// The live value, if the key is present.
    pub fn value(&self) -> Option<&str> {
        match self {
            CurrentState::Present(record) => Some(record.value.as_str()),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, CurrentState::Present(_))
    }

    /// The newest record, tombstone or not.
    pub fn latest(&self) -> Option<&LogRecord> {
        match self {
            CurrentState::Absent => None,
            CurrentState::Deleted(record) | CurrentState::Present(record) => Some(record),
        }
    }

    pub fn into_latest(self) -> Option<LogRecord> {
        match self {
            CurrentState::Absent => None,
            CurrentState::Deleted(record) | CurrentState::Present(record) => Some(record),
        }
    }
}

/// Reconstruct the current state of a key from its records, in append order.
///
/// The maximum timestamp wins regardless of append order. Among records with
/// the same timestamp, the one appended last wins.
pub fn resolve_current<'a, I>(records: I) -> CurrentState
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let mut latest: Option<&LogRecord> = None;
    for record in records {
        match latest {
            Some(current) if current.timestamp > record.timestamp => {}
            _ => latest = Some(record),
        }
    }
    CurrentState::from_latest(latest.cloned())
}

/// Validate a key supplied by a client.
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "key".to_string(),
        });
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ValidationError::InvalidValue {
            field: "key".to_string(),
            reason: format!("key exceeds {} bytes", MAX_KEY_LEN),
        });
    }
    if key.chars().any(char::is_control) {
        return Err(ValidationError::InvalidValue {
            field: "key".to_string(),
            reason: "key must not contain control characters".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_absent_when_no_records() {
        let state = resolve_current(std::iter::empty());
        assert_eq!(state, CurrentState::Absent);
        assert!(state.value().is_none());
    }

    #[test]
    fn test_latest_timestamp_wins_regardless_of_order() {
        let newer = LogRecord::put("k", "v2", at(2));
        let older = LogRecord::put("k", "v1", at(1));
        let state = resolve_current([&newer, &older]);
        assert_eq!(state.value(), Some("v2"));
    }

    #[test]
    fn test_tombstone_hides_key() {
        let records = [
            LogRecord::put("k", "v1", at(1)),
            LogRecord::tombstone("k", at(2)),
        ];
        let state = resolve_current(records.iter());
        assert!(matches!(state, CurrentState::Deleted(_)));
        assert!(!state.is_found());
    }

    #[test]
    fn test_put_after_tombstone_restores_key() {
        let records = [
            LogRecord::put("k", "v1", at(1)),
            LogRecord::tombstone("k", at(2)),
            LogRecord::put("k", "v3", at(3)),
        ];
        assert_eq!(resolve_current(records.iter()).value(), Some("v3"));
    }

    #[test]
    fn test_equal_timestamps_later_append_wins() {
        let records = [
            LogRecord::put("k", "first", at(5)),
            LogRecord::put("k", "second", at(5)),
        ];
        assert_eq!(resolve_current(records.iter()).value(), Some("second"));
    }

    #[test]
    fn test_tombstone_has_empty_value() {
        let record = LogRecord::tombstone("k", at(0));
        assert!(record.is_tombstone());
        assert!(record.value.is_empty());
    }

    #[test]
    fn test_record_json_shape() -> Result<(), serde_json::Error> {
        let record = LogRecord::put("k", "v", at(0));
        let json = serde_json::to_value(&record)?;
        assert_eq!(json["key"], "k");
        assert_eq!(json["value"], "v");
        assert_eq!(json["deleted"], false);
        assert!(json["timestamp"].is_string());
        Ok(())
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("user/42").is_ok());
        assert!(matches!(
            validate_key(""),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(validate_key(&"x".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(validate_key("bad\nkey").is_err());
    }

    proptest! {
        #[test]
        fn prop_max_timestamp_wins(offsets in proptest::collection::vec(0i64..1_000, 1..32)) {
            let base = at(0);
            let records: Vec<LogRecord> = offsets
                .iter()
                .enumerate()
                .map(|(i, off)| LogRecord::put("k", format!("v{}", i), base + Duration::seconds(*off)))
                .collect();

            let state = resolve_current(records.iter());
            let max_ts = offsets.iter().max().copied().unwrap_or(0);
            let winner = state.latest().cloned();
            prop_assert!(winner.is_some());
            let winner = winner.unwrap();
            prop_assert_eq!(winner.timestamp, base + Duration::seconds(max_ts));

            // Last appended among the maximal records.
            let expected_idx = offsets.iter().rposition(|o| *o == max_ts).unwrap();
            prop_assert_eq!(winner.value, format!("v{}", expected_idx));
        }
    }
}
