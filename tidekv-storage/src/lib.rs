//! TIDEKV Storage - Consistency and Hydration Protocol
//!
//! This crate holds the parts of tidekv with real invariants:
//!
//! - [`LogStore`]: the durable, append-only source of truth (consumed through
//!   append / query-latest / subscribe). [`InMemoryLogStore`] implements it
//!   in-process; the PostgreSQL implementation lives in `tidekv-api`.
//! - [`CacheBackend`]: the per-region key/value cache ([`InMemoryCache`],
//!   [`LmdbCacheBackend`]).
//! - [`ReadThroughResolver`]: serves reads from the cache, deduplicating
//!   concurrent misses per key and falling back to the log.
//! - [`WritePath`]: appends values and tombstones to the log, never touching
//!   the cache.
//! - [`Hydrator`]: consumes the log's change feed and applies each committed
//!   record to the cache, refusing to regress a key to an older version.
//!
//! Data flow: `WritePath -> LogStore -> Hydrator -> Cache`, and for reads
//! `Cache -> (miss) -> LogStore -> Cache -> caller`.

pub mod cache;
mod deadline;
pub mod hydrator;
pub mod key_lock;
pub mod log_store;
pub mod provision;
pub mod resolver;
pub mod version_guard;
pub mod writer;

pub use cache::{CacheBackend, CacheStats, InMemoryCache, LmdbCacheBackend, LmdbCacheError};
pub use hydrator::{ApplyOutcome, Hydrator, HydratorStats};
pub use key_lock::{KeyLockGuard, KeyLockTable};
pub use log_store::{ChangeStream, InMemoryLogStore, LogStore};
pub use provision::provision_with_retry;
pub use resolver::{ReadSource, ReadThroughResolver, Resolved, ResolverStats};
pub use version_guard::{fingerprint, Admission, AppliedVersion, VersionGuard};
pub use writer::WritePath;
