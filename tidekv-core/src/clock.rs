//! Timestamp sources for the write path.

use std::sync::Mutex;

use chrono::{Duration, SubsecRound, Utc};

use crate::Timestamp;

/// Source of record timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time, no ordering guarantees.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Wall-clock time that never repeats or goes backwards within a process.
///
/// Readings are truncated to microseconds, the precision the log stores,
/// and each call returns `max(now, previous + 1µs)`. Two writes issued by
/// the same process therefore never share a stored timestamp.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<Timestamp>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let wall = Utc::now().trunc_subsecs(6);
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = match *last {
            Some(prev) if wall <= prev => prev + Duration::microseconds(1),
            _ => wall,
        };
        *last = Some(next);
        next
    }
}

/// Clock pinned to a caller-controlled instant.
#[derive(Debug)]
pub struct FixedClock {
    at: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(at: Timestamp) -> Self {
        Self { at: Mutex::new(at) }
    }

    pub fn set(&self, at: Timestamp) {
        let mut guard = match self.at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = match self.at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        match self.at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
