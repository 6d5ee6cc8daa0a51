//! tidekv Test Utilities
//!
//! Shared test infrastructure for the tidekv workspace:
//! - Fault-injecting wrappers around the cache and log collaborators
//! - Test fixtures for common scenarios
//! - Proptest generators for keys, values and log histories

pub use tidekv_core::{
    ChangeEvent, FeedCursor, HydratorConfig, KvError, KvResult, LogRecord, ResolverConfig,
    RetryConfig, Timestamp,
};
pub use tidekv_storage::{CacheBackend, CacheStats, InMemoryCache, InMemoryLogStore, LogStore};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tidekv_core::{CacheError, LogError};
use tidekv_storage::ChangeStream;

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Cache that can be switched off or slowed down at runtime.
///
/// Delegates to an [`InMemoryCache`] when healthy.
#[derive(Debug, Default)]
pub struct FlakyCache {
    inner: InMemoryCache,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
    latency_ms: AtomicU64,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`CacheError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail `set` only; reads and deletes keep working.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Read the underlying map directly, bypassing faults.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.inner.peek(key)
    }

    async fn gate(&self) -> KvResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                reason: "injected outage".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyCache {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.gate().await?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Backend {
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.gate().await?;
        self.inner.delete(key).await
    }

    async fn stats(&self) -> KvResult<CacheStats> {
        self.gate().await?;
        self.inner.stats().await
    }
}

/// Log store wrapper that counts calls and can inject latency or failure.
#[derive(Debug)]
pub struct CountingLogStore {
    inner: Arc<InMemoryLogStore>,
    queries: AtomicU64,
    appends: AtomicU64,
    failing: AtomicBool,
    query_delay_ms: AtomicU64,
}

impl Default for CountingLogStore {
    fn default() -> Self {
        Self::wrap(Arc::new(InMemoryLogStore::new()))
    }
}

impl CountingLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrap(inner: Arc<InMemoryLogStore>) -> Self {
        Self {
            inner,
            queries: AtomicU64::new(0),
            appends: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            query_delay_ms: AtomicU64::new(0),
        }
    }

    /// The wrapped store, for direct seeding and feed control.
    pub fn inner(&self) -> &Arc<InMemoryLogStore> {
        &self.inner
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn append_count(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }

    /// Make every call fail with [`LogError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay each `query_latest` by `delay`.
    pub fn set_query_delay(&self, delay: Duration) {
        self.query_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check(&self) -> KvResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable {
                reason: "injected outage".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for CountingLogStore {
    async fn append(&self, record: &LogRecord) -> KvResult<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.append(record).await
    }

    async fn query_latest(&self, key: &str) -> KvResult<Option<LogRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = self.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check()?;
        self.inner.query_latest(key).await
    }

    async fn subscribe_changes(&self, from: Option<&FeedCursor>) -> KvResult<ChangeStream> {
        self.check()?;
        self.inner.subscribe_changes(from).await
    }

    async fn provision(&self) -> KvResult<()> {
        self.check()
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::TimeZone;

    /// Fixed reference instant (2023-11-14T22:13:20Z).
    pub fn base_time() -> Timestamp {
        chrono::Utc
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_else(chrono::Utc::now)
    }

    /// `base_time()` shifted by `secs`.
    pub fn at(secs: i64) -> Timestamp {
        base_time() + chrono::Duration::seconds(secs)
    }

    pub fn put_record(key: &str, value: &str, secs: i64) -> LogRecord {
        LogRecord::put(key, value, at(secs))
    }

    pub fn tombstone_record(key: &str, secs: i64) -> LogRecord {
        LogRecord::tombstone(key, at(secs))
    }

    /// Change event carrying `record` in the bare row shape.
    pub fn event_for(record: &LogRecord) -> ChangeEvent {
        ChangeEvent::from_record(record, None)
    }

    /// Retry policy with millisecond backoff for tests.
    pub fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        }
    }

    /// Hydrator configuration that reconnects quickly.
    pub fn fast_hydrator_config() -> HydratorConfig {
        HydratorConfig::default().with_reconnect(fast_retry(u32::MAX))
    }

    /// Resolver configuration with short timeouts.
    pub fn fast_resolver_config() -> ResolverConfig {
        ResolverConfig::default()
            .with_cache_timeout(Duration::from_millis(20))
            .with_log_timeout(Duration::from_millis(500))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tidekv types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid key, sometimes containing `/`.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,2}"
    }

    /// Generate an opaque value, possibly empty.
    pub fn arb_value() -> impl Strategy<Value = String> {
        "[ -~]{0,32}"
    }

    /// Generate a Timestamp (DateTime<Utc>) within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Generate a put or tombstone for `key`.
    pub fn arb_record_for(key: String) -> impl Strategy<Value = LogRecord> {
        (arb_value(), arb_timestamp(), proptest::bool::weighted(0.25)).prop_map(
            move |(value, timestamp, deleted)| {
                if deleted {
                    LogRecord::tombstone(key.clone(), timestamp)
                } else {
                    LogRecord::put(key.clone(), value, timestamp)
                }
            },
        )
    }

    /// Generate a non-empty history of records for a single key.
    pub fn arb_history() -> impl Strategy<Value = Vec<LogRecord>> {
        arb_key().prop_flat_map(|key| prop::collection::vec(arb_record_for(key), 1..16))
    }
}
