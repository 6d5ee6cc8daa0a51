//! Write path: PUT and DELETE become log appends.
//!
//! Writes never touch the cache. A write succeeds exactly when the log
//! acknowledges the append; the hydrator brings caches up to date later.

use std::sync::Arc;
use std::time::Duration;

use tidekv_core::{validate_key, Clock, KvResult, LogRecord};
use tracing::{debug, error};

use crate::deadline::log_call;
use crate::log_store::LogStore;

/// Appends value and tombstone records to the log.
pub struct WritePath {
    log: Arc<dyn LogStore>,
    clock: Arc<dyn Clock>,
    log_timeout: Duration,
}

impl WritePath {
    pub fn new(log: Arc<dyn LogStore>, clock: Arc<dyn Clock>, log_timeout: Duration) -> Self {
        Self {
            log,
            clock,
            log_timeout,
        }
    }

    /// Append `key = value`. Returns the stored record.
    pub async fn put(&self, key: &str, value: &str) -> KvResult<LogRecord> {
        validate_key(key)?;
        let record = LogRecord::put(key, value, self.clock.now());
        self.append(record).await
    }

    /// Append a tombstone for `key`. Returns the stored tombstone.
    ///
    /// Deleting a key that was never written still appends a tombstone.
    pub async fn delete(&self, key: &str) -> KvResult<LogRecord> {
        validate_key(key)?;
        let record = LogRecord::tombstone(key, self.clock.now());
        self.append(record).await
    }

    async fn append(&self, record: LogRecord) -> KvResult<LogRecord> {
        match log_call("append", self.log_timeout, self.log.append(&record)).await {
            Ok(()) => {
                debug!(
                    key = %record.key,
                    timestamp = %record.timestamp,
                    deleted = record.deleted,
                    "Record appended"
                );
                Ok(record)
            }
            Err(e) => {
                error!(key = %record.key, deleted = record.deleted, error = %e, "Log append failed");
                Err(e)
            }
        }
    }
}
