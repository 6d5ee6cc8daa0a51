//! Error types for TIDEKV operations

use std::time::Duration;
use thiserror::Error;

/// Request validation errors. Rejected before any side effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Durable log store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("Log store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Log store {operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("Log store {operation} failed: {reason}")]
    QueryFailed {
        operation: &'static str,
        reason: String,
    },

    #[error("Provisioning failed after {attempts} attempts: {reason}")]
    ProvisionFailed { attempts: u32, reason: String },
}

/// Cache collaborator errors. Never surfaced to readers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache {operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },
}

/// A change feed payload that could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChangeEventError {
    #[error("Malformed change event: {reason}")]
    Malformed { reason: String },
}

/// Change feed subscription errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Change stream disconnected: {reason}")]
    Disconnected { reason: String },

    #[error("Change stream subscription failed: {reason}")]
    SubscribeFailed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all TIDEKV errors.
#[derive(Debug, Clone, Error)]
pub enum KvError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Change event error: {0}")]
    ChangeEvent(#[from] ChangeEventError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl KvError {
    /// True when the durable log failed; such errors are always surfaced.
    pub fn is_log_failure(&self) -> bool {
        matches!(self, KvError::Log(_))
    }

    /// True when only the cache failed; callers degrade instead of failing.
    pub fn is_cache_failure(&self) -> bool {
        matches!(self, KvError::Cache(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, KvError::Validation(_))
    }
}

/// Result type alias for TIDEKV operations.
pub type KvResult<T> = Result<T, KvError>;

// =============================================================================
// TESTS
// =============================================================================
