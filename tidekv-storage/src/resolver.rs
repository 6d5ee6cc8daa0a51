//! Read-through resolver.
//!
//! Serves reads from the cache and falls back to the log on a miss. Misses
//! for the same key are serialized through a [`KeyLockTable`] so a burst of
//! readers issues one log query; the first reader repopulates the cache and
//! the rest find the value on their re-check.
//!
//! A cache that errors or times out is treated as a miss. Only log failures
//! reach the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tidekv_core::{validate_key, CurrentState, KvResult, LogRecord, ResolverConfig};
use tracing::{debug, warn};

use crate::cache::CacheBackend;
use crate::deadline::{cache_call, log_call};
use crate::key_lock::KeyLockTable;
use crate::log_store::LogStore;
use crate::version_guard::{fingerprint, VersionGuard};

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// First cache lookup hit.
    CacheHit,
    /// Hit on the re-check after waiting for another reader's fill.
    CacheHitAfterWait,
    /// Answered by the log store.
    Log,
}

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub key: String,
    /// `None` when the key was never written or its latest record is a tombstone.
    pub value: Option<String>,
    pub source: ReadSource,
}

impl Resolved {
    pub fn found(&self) -> bool {
        self.value.is_some()
    }
}

/// Snapshot of resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_errors: u64,
    pub log_queries: u64,
    pub populate_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,
    log_queries: AtomicU64,
    populate_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ResolverStats {
        ResolverStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            log_queries: self.log_queries.load(Ordering::Relaxed),
            populate_failures: self.populate_failures.load(Ordering::Relaxed),
        }
    }
}

/// Cache-first reader with per-key miss deduplication.
pub struct ReadThroughResolver {
    cache: Arc<dyn CacheBackend>,
    log: Arc<dyn LogStore>,
    guard: Option<Arc<VersionGuard>>,
    locks: KeyLockTable,
    config: ResolverConfig,
    counters: Counters,
}

impl ReadThroughResolver {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        log: Arc<dyn LogStore>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            cache,
            log,
            guard: None,
            locks: KeyLockTable::new(),
            config,
            counters: Counters::default(),
        }
    }

    /// Share the hydrator's applied-version guard so a fill never
    /// overwrites a newer value the hydrator already wrote.
    pub fn with_version_guard(mut self, guard: Arc<VersionGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn stats(&self) -> ResolverStats {
        self.counters.snapshot()
    }

    /// Number of keys with a miss currently in flight.
    pub fn inflight_misses(&self) -> usize {
        self.locks.len()
    }

    /// Resolve the current value of `key`.
    pub async fn get(&self, key: &str) -> KvResult<Resolved> {
        validate_key(key)?;

        if let Some(value) = self.lookup(key).await {
            return Ok(Self::answer(key, Some(value), ReadSource::CacheHit));
        }

        if !self.config.dedup_misses {
            return self.fill_from_log(key).await;
        }

        let _section = self.locks.lock(key).await;
        if let Some(value) = self.lookup(key).await {
            return Ok(Self::answer(key, Some(value), ReadSource::CacheHitAfterWait));
        }
        self.fill_from_log(key).await
    }

    fn answer(key: &str, value: Option<String>, source: ReadSource) -> Resolved {
        Resolved {
            key: key.to_string(),
            value,
            source,
        }
    }

    /// Cache lookup that never fails: errors and timeouts count as misses.
    async fn lookup(&self, key: &str) -> Option<String> {
        match cache_call("get", self.config.cache_timeout, self.cache.get(key)).await {
            Ok(Some(value)) => {
                Counters::bump(&self.counters.cache_hits);
                Some(value)
            }
            Ok(None) => {
                Counters::bump(&self.counters.cache_misses);
                None
            }
            Err(e) => {
                Counters::bump(&self.counters.cache_errors);
                warn!(key = %key, error = %e, "Cache lookup failed, falling back to log");
                None
            }
        }
    }

    async fn fill_from_log(&self, key: &str) -> KvResult<Resolved> {
        Counters::bump(&self.counters.log_queries);
        let latest = log_call(
            "query_latest",
            self.config.log_timeout,
            self.log.query_latest(key),
        )
        .await?;

        match CurrentState::from_latest(latest) {
            CurrentState::Absent => {
                debug!(key = %key, "Key not in log");
                Ok(Self::answer(key, None, ReadSource::Log))
            }
            CurrentState::Deleted(record) => {
                debug!(key = %key, timestamp = %record.timestamp, "Latest record is a tombstone");
                Ok(Self::answer(key, None, ReadSource::Log))
            }
            CurrentState::Present(record) => {
                self.populate(&record).await;
                Ok(Self::answer(key, Some(record.value), ReadSource::Log))
            }
        }
    }

    /// Best-effort cache fill. Failures are logged and counted only.
    async fn populate(&self, record: &LogRecord) {
        if let Some(guard) = &self.guard {
            if !guard.admits_fill(&record.key, record.timestamp) {
                debug!(
                    key = %record.key,
                    timestamp = %record.timestamp,
                    "Skipping fill, cache already holds a newer version"
                );
                return;
            }
        }

        let set = self.cache.set(&record.key, &record.value);
        match cache_call("set", self.config.cache_timeout, set).await {
            Ok(()) => {
                if let Some(guard) = &self.guard {
                    guard.record(
                        &record.key,
                        record.timestamp,
                        fingerprint(&record.value, record.deleted),
                    );
                }
            }
            Err(e) => {
                Counters::bump(&self.counters.populate_failures);
                warn!(key = %record.key, error = %e, "Failed to populate cache after log read");
            }
        }
    }
}
