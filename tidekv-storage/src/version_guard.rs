//! Applied-version tracking for the cache.
//!
//! The change feed is at-least-once and a resubscription may replay events
//! the cache already reflects. The guard remembers, per key, the newest
//! record timestamp written to the cache so older events cannot regress it.
//! Entries are forgotten after a retention window; a forgotten key simply
//! accepts the next event, which is what an empty guard does on startup.
//!
//! Two writes can share a timestamp at storage precision. The guard keeps a
//! fingerprint of the applied payload so only an exact redelivery counts as
//! a duplicate; a different payload at the same timestamp is admitted.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use tidekv_core::Timestamp;
use tokio::time::{Duration, Instant};

/// Newest version written to the cache for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedVersion {
    /// Log timestamp of the record the cache reflects.
    pub timestamp: Timestamp,
    /// [`fingerprint`] of the payload the cache reflects.
    pub fingerprint: u64,
    /// When the guard last recorded this key.
    pub observed_at: Instant,
}

/// Verdict for an incoming versioned write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Newer than anything applied, the key is unknown, or the timestamp
    /// ties with a different payload.
    Fresh,
    /// Same timestamp and payload as the applied version.
    Duplicate,
    /// Strictly older than the applied version.
    Stale { applied: Timestamp },
}

impl Admission {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Admission::Fresh)
    }
}

/// Stable digest of a record's cache effect.
pub fn fingerprint(value: &str, deleted: bool) -> u64 {
    let mut hasher = DefaultHasher::new();
    deleted.hash(&mut hasher);
    if !deleted {
        value.hash(&mut hasher);
    }
    hasher.finish()
}

/// Concurrent per-key applied-version map.
#[derive(Debug, Default)]
pub struct VersionGuard {
    applied: DashMap<String, AppliedVersion>,
}

impl VersionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a change event carrying `timestamp` and payload
    /// `fingerprint` for `key`.
    pub fn check(&self, key: &str, timestamp: Timestamp, fingerprint: u64) -> Admission {
        match self.applied.get(key) {
            None => Admission::Fresh,
            Some(version) if timestamp > version.timestamp => Admission::Fresh,
            Some(version) if timestamp == version.timestamp => {
                if fingerprint == version.fingerprint {
                    Admission::Duplicate
                } else {
                    Admission::Fresh
                }
            }
            Some(version) => Admission::Stale {
                applied: version.timestamp,
            },
        }
    }

    /// Whether a read-through fill of `timestamp` may be written.
    ///
    /// Fills re-read the log, so an equal timestamp is the same record and
    /// rewriting it is harmless.
    pub fn admits_fill(&self, key: &str, timestamp: Timestamp) -> bool {
        self.applied
            .get(key)
            .map_or(true, |version| timestamp >= version.timestamp)
    }

    /// Note that the cache now reflects `timestamp` and `fingerprint` for
    /// `key`.
    ///
    /// Never lowers a recorded version.
    pub fn record(&self, key: &str, timestamp: Timestamp, fingerprint: u64) {
        let now = Instant::now();
        self.applied
            .entry(key.to_string())
            .and_modify(|version| {
                if timestamp >= version.timestamp {
                    version.timestamp = timestamp;
                    version.fingerprint = fingerprint;
                }
                version.observed_at = now;
            })
            .or_insert(AppliedVersion {
                timestamp,
                fingerprint,
                observed_at: now,
            });
    }

    pub fn applied(&self, key: &str) -> Option<AppliedVersion> {
        self.applied.get(key).map(|version| *version)
    }

    /// Forget keys not recorded within `retention`. Returns how many.
    pub fn prune(&self, retention: Duration) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(retention) else {
            return 0;
        };
        let before = self.applied.len();
        self.applied.retain(|_, version| version.observed_at >= cutoff);
        before.saturating_sub(self.applied.len())
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fp(value: &str) -> u64 {
        fingerprint(value, false)
    }

    #[test]
    fn test_unknown_key_is_fresh() {
        let guard = VersionGuard::new();
        assert_eq!(guard.check("k", at(0), fp("v")), Admission::Fresh);
        assert!(guard.admits_fill("k", at(0)));
    }

    #[test]
    fn test_classification_against_applied() {
        let guard = VersionGuard::new();
        guard.record("k", at(10), fp("v"));

        assert_eq!(guard.check("k", at(11), fp("w")), Admission::Fresh);
        assert_eq!(guard.check("k", at(10), fp("v")), Admission::Duplicate);
        assert_eq!(
            guard.check("k", at(9), fp("w")),
            Admission::Stale { applied: at(10) }
        );
        assert!(guard.admits_fill("k", at(10)));
        assert!(!guard.admits_fill("k", at(9)));
    }

    #[test]
    fn test_tie_with_different_payload_is_fresh() {
        let guard = VersionGuard::new();
        guard.record("k", at(10), fp("first"));

        assert_eq!(guard.check("k", at(10), fp("second")), Admission::Fresh);
        assert_eq!(
            guard.check("k", at(10), fingerprint("", true)),
            Admission::Fresh
        );

        guard.record("k", at(10), fp("second"));
        assert_eq!(guard.check("k", at(10), fp("second")), Admission::Duplicate);
        assert_eq!(guard.check("k", at(10), fp("first")), Admission::Fresh);
    }

    #[test]
    fn test_tombstone_fingerprint_ignores_value() {
        assert_eq!(fingerprint("", true), fingerprint("leftover", true));
        assert_ne!(fingerprint("", true), fingerprint("", false));
    }

    #[test]
    fn test_record_never_lowers() {
        let guard = VersionGuard::new();
        guard.record("k", at(10), fp("new"));
        guard.record("k", at(5), fp("old"));
        let applied = guard.applied("k");
        assert_eq!(applied.map(|v| v.timestamp), Some(at(10)));
        assert_eq!(applied.map(|v| v.fingerprint), Some(fp("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_forgets_idle_keys() {
        let guard = VersionGuard::new();
        guard.record("old", at(1), fp("a"));
        tokio::time::advance(Duration::from_secs(120)).await;
        guard.record("new", at(2), fp("b"));

        assert_eq!(guard.prune(Duration::from_secs(60)), 1);
        assert!(guard.applied("old").is_none());
        assert!(guard.applied("new").is_some());
        assert_eq!(guard.len(), 1);
    }
}
