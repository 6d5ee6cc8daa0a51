//! TIDEKV Core - Log Record Model
//!
//! The durable log is the single source of truth for tidekv. This crate
//! defines the record format written to it, the rule that reconstructs a
//! key's current value from its history, and the change messages the
//! hydrator consumes from the log's change feed.
//!
//! No I/O happens here. Storage collaborators live in `tidekv-storage` and
//! the HTTP surface lives in `tidekv-api`.

pub mod change;
pub mod clock;
pub mod config;
pub mod error;
pub mod record;

pub use change::{ChangeEvent, ChangeMessage, Decoded, FeedCursor};
pub use clock::{Clock, FixedClock, MonotonicClock, SystemClock};
pub use config::{HydratorConfig, ResolverConfig, RetryConfig};
pub use error::{
    CacheError, ChangeEventError, ConfigError, KvError, KvResult, LogError, StreamError,
    ValidationError,
};
pub use record::{resolve_current, validate_key, CurrentState, LogRecord, MAX_KEY_LEN};

/// Timestamp type used for log ordering.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
