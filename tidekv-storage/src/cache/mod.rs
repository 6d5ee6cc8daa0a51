//! Per-region key/value cache.
//!
//! The cache is a derived projection of the log. Nothing in it is
//! authoritative: any entry may be missing, and the hydrator and resolver
//! are the only writers. Readers treat every backend failure as a miss.

pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCache;
pub use traits::{CacheBackend, CacheStats};
