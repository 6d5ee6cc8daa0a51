//! In-process cache backed by a concurrent map.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tidekv_core::KvResult;

use super::traits::{CacheBackend, CacheStats};

/// DashMap-backed cache. Never fails.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, String>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek that does not count towards hit/miss statistics.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value.value().clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn stats(&self) -> KvResult<CacheStats> {
        let memory_bytes = self
            .entries
            .iter()
            .map(|entry| (entry.key().len() + entry.value().len()) as u64)
            .sum();
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            memory_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() -> KvResult<()> {
        let cache = InMemoryCache::new();
        assert_eq!(cache.get("k").await?, None);

        cache.set("k", "v1").await?;
        cache.set("k", "v2").await?;
        assert_eq!(cache.get("k").await?, Some("v2".to_string()));

        cache.delete("k").await?;
        cache.delete("k").await?;
        assert_eq!(cache.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() -> KvResult<()> {
        let cache = InMemoryCache::new();
        cache.set("a", "xyz").await?;
        cache.get("a").await?;
        cache.get("b").await?;
        assert_eq!(cache.peek("a"), Some("xyz".to_string()));

        let stats = cache.stats().await?;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.memory_bytes, 4);
        Ok(())
    }
}
