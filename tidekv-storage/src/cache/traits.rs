//! Cache backend trait.

use async_trait::async_trait;
use tidekv_core::KvResult;

/// Cache backend for pluggable cache implementations.
///
/// Values are opaque strings stored under the caller's key as-is; a key is
/// either present with the value last set, or absent. Implementations must
/// be safe for concurrent use from many tasks.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> KvResult<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> KvResult<()>;

    /// Get cache statistics.
    async fn stats(&self) -> KvResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload size in bytes.
    pub memory_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
