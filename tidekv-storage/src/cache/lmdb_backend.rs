//! LMDB-backed cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep the regional cache
//! in a memory-mapped file, so a restarted node comes back warm. Keys and
//! values are stored as UTF-8 strings in a single unnamed database.
//!
//! LMDB provides ACID transactions. The backend uses read transactions for
//! `get` and write transactions for `set` and `delete`. Hit and miss counts
//! are tracked with atomic counters; entry counts come from the database.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use tidekv_core::{CacheError, KvError, KvResult};

use super::traits::{CacheBackend, CacheStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for KvError {
    fn from(e: LmdbCacheError) -> Self {
        KvError::Cache(CacheError::Backend {
            reason: e.to_string(),
        })
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed cache.
///
/// # Example
///
/// ```ignore
/// use tidekv_storage::{CacheBackend, LmdbCacheBackend};
///
/// let backend = LmdbCacheBackend::new("/var/lib/tidekv/cache", 1024)?;
/// backend.set("user:1", "alice").await?;
/// assert_eq!(backend.get("user:1").await?, Some("alice".to_string()));
/// ```
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Str, Str>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbCacheBackend {
    /// Open (or create) an LMDB cache at `path`.
    ///
    /// `max_size_mb` bounds the memory map. Writes fail once it is full.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process
        // and never with conflicting flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb.max(1) * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn entry_stats(&self) -> Result<(u64, u64), LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut entries = 0u64;
        let mut bytes = 0u64;
        for item in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, value) = item.map_err(txn_error)?;
            entries += 1;
            bytes += (key.len() + value.len()) as u64;
        }
        Ok((entries, bytes))
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        match self.db.get(&rtxn, key) {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value.to_string()))
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(txn_error(e).into())
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.put(&mut wtxn, key, value).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    async fn stats(&self) -> KvResult<CacheStats> {
        let (entry_count, memory_bytes) = self.entry_stats()?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
        })
    }
}
