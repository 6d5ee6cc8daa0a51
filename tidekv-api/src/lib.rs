//! TIDEKV API - HTTP Surface and Database Log Store
//!
//! Exposes the key-value store over REST, backs the durable log with a
//! PostgreSQL / CockroachDB table, and hosts the cache hydrator. The
//! `tidekv-api` binary serves requests; `tidekv-hydrator` runs the
//! hydrator alone.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ApiConfig, CacheBackendKind, LogBackend};
pub use db::{DbConfig, PgLogStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::AppState;

use std::sync::Arc;

use tidekv_core::KvResult;
use tidekv_storage::{CacheBackend, InMemoryCache, InMemoryLogStore, LmdbCacheBackend, LogStore};
use telemetry::InstrumentedLogStore;

/// Build the configured log store, wrapped with operation metrics.
pub fn build_log_store(config: &ApiConfig) -> ApiResult<Arc<dyn LogStore>> {
    let store: Arc<dyn LogStore> = match config.log_backend {
        LogBackend::Postgres => Arc::new(PgLogStore::from_config(&DbConfig::from_env())?),
        LogBackend::Memory => {
            tracing::warn!("Using in-memory log store; writes are lost on restart");
            Arc::new(InMemoryLogStore::new())
        }
    };
    Ok(Arc::new(InstrumentedLogStore::new(store)))
}

/// Build the configured cache backend.
pub fn build_cache(config: &ApiConfig) -> KvResult<Arc<dyn CacheBackend>> {
    Ok(match config.cache_backend {
        CacheBackendKind::Lmdb => Arc::new(LmdbCacheBackend::new(&config.lmdb_path, config.lmdb_max_mb)?),
        CacheBackendKind::Memory => Arc::new(InMemoryCache::new()),
    })
}
