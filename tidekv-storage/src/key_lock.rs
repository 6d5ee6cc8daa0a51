//! Per-key async mutual exclusion.
//!
//! Used by the resolver so that concurrent misses for one key issue a single
//! log query. Entries exist only while some task holds or waits on the key;
//! the table does not grow with the keyspace.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of lazily created per-key locks.
#[derive(Debug, Default)]
pub struct KeyLockTable {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Waiters are served in FIFO order. The lock is released when the
    /// returned guard is dropped, including on panic or cancellation. A
    /// waiter cancelled before it acquires still gives up its table entry.
    pub async fn lock(&self, key: &str) -> KeyLockGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let mut entry = EntryRef {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            mutex: Some(Arc::clone(&mutex)),
        };
        let guard = mutex.lock_owned().await;
        // The owned guard now keeps the mutex alive in place of the waiter's clone.
        entry.mutex = None;
        KeyLockGuard {
            entry,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Reference to one table entry, pruned on drop when nobody else uses it.
#[derive(Debug)]
struct EntryRef {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    mutex: Option<Arc<Mutex<()>>>,
}

impl Drop for EntryRef {
    fn drop(&mut self) {
        drop(self.mutex.take());
        // Only the table's own reference left: nobody holds or waits.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Exclusive hold on one key.
#[derive(Debug)]
pub struct KeyLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    entry: EntryRef,
}

impl KeyLockGuard {
    pub fn key(&self) -> &str {
        &self.entry.key
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        // Release first so the owned guard's Arc no longer counts.
        drop(self.guard.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let table = KeyLockTable::new();
        {
            let guard = table.lock("k").await;
            assert_eq!(guard.key(), "k");
            assert_eq!(table.len(), 1);
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let table = KeyLockTable::new();
        let _a = table.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), table.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let table = Arc::new(KeyLockTable::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let table = Arc::clone(&table);
            let inside = Arc::clone(&inside);
            tasks.push(tokio::spawn(async move {
                let _guard = table.lock("hot").await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_entry() {
        let table = Arc::new(KeyLockTable::new());
        let mut holders = Vec::new();
        let mut waiters = Vec::new();

        for key in ["j", "m"] {
            holders.push(table.lock(key).await);
            let waiting = Arc::clone(&table);
            waiters.push(tokio::spawn(async move {
                let _guard = waiting.lock(key).await;
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for waiter in waiters {
            waiter.abort();
            assert!(waiter.await.unwrap_err().is_cancelled());
        }
        assert_eq!(table.len(), 2);

        drop(holders);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_waiter_leaves_no_entry() {
        let table = KeyLockTable::new();
        let holder = table.lock("k").await;
        let waited = tokio::time::timeout(Duration::from_millis(20), table.lock("k")).await;
        assert!(waited.is_err());

        drop(holder);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_released_on_panic() {
        let table = Arc::new(KeyLockTable::new());
        let panicking = Arc::clone(&table);
        let result = tokio::spawn(async move {
            let _guard = panicking.lock("k").await;
            panic!("boom");
        })
        .await;
        assert!(result.is_err());

        let relock = tokio::time::timeout(Duration::from_millis(100), table.lock("k")).await;
        assert!(relock.is_ok());
    }
}
