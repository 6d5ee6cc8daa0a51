//! Configuration types
//!
//! Every collaborator call made by the core is bounded by a timeout from one
//! of these structs. Environment loading lives in the API crate; these types
//! only carry defaults and validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, KvError, KvResult};

fn require_positive(field: &str, value: Duration) -> KvResult<()> {
    if value.is_zero() {
        return Err(KvError::Config(ConfigError::InvalidValue {
            field: field.to_string(),
            value: format!("{:?}", value),
            reason: format!("{} must be positive", field),
        }));
    }
    Ok(())
}

/// Read-through resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Bound on each cache call. A timed-out lookup falls back to the log.
    pub cache_timeout: Duration,
    /// Bound on each log query. A timed-out query fails the read.
    pub log_timeout: Duration,
    /// Serialize concurrent misses for the same key.
    pub dedup_misses: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_millis(50),
            log_timeout: Duration::from_secs(2),
            dedup_misses: true,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_log_timeout(mut self, timeout: Duration) -> Self {
        self.log_timeout = timeout;
        self
    }

    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.dedup_misses = enabled;
        self
    }

    pub fn validate(&self) -> KvResult<()> {
        require_positive("cache_timeout", self.cache_timeout)?;
        require_positive("log_timeout", self.log_timeout)
    }
}

/// Retry policy with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based), capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor as f64)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn validate(&self) -> KvResult<()> {
        require_positive("initial_backoff", self.initial_backoff)?;
        if self.max_backoff < self.initial_backoff {
            return Err(KvError::Config(ConfigError::InvalidValue {
                field: "max_backoff".to_string(),
                value: format!("{:?}", self.max_backoff),
                reason: "max_backoff must be at least initial_backoff".to_string(),
            }));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(KvError::Config(ConfigError::InvalidValue {
                field: "backoff_multiplier".to_string(),
                value: self.backoff_multiplier.to_string(),
                reason: "backoff_multiplier must be at least 1.0".to_string(),
            }));
        }
        Ok(())
    }
}

/// Change stream consumer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratorConfig {
    /// Bound on each cache set/delete.
    pub cache_timeout: Duration,
    /// Backoff between resubscription attempts. `max_retries` is ignored;
    /// the hydrator retries until shut down.
    pub reconnect: RetryConfig,
    /// Skip events older than what the cache already reflects.
    pub order_guard: bool,
    /// How long applied versions are remembered.
    pub guard_retention: Duration,
    /// How often the version guard is pruned.
    pub prune_interval: Duration,
}

impl Default for HydratorConfig {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_millis(200),
            reconnect: RetryConfig {
                max_retries: u32::MAX,
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(30),
                backoff_multiplier: 2.0,
            },
            order_guard: true,
            guard_retention: Duration::from_secs(3600),
            prune_interval: Duration::from_secs(60),
        }
    }
}

impl HydratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_order_guard(mut self, enabled: bool) -> Self {
        self.order_guard = enabled;
        self
    }

    pub fn with_guard_retention(mut self, retention: Duration) -> Self {
        self.guard_retention = retention;
        self
    }

    pub fn validate(&self) -> KvResult<()> {
        require_positive("cache_timeout", self.cache_timeout)?;
        require_positive("guard_retention", self.guard_retention)?;
        require_positive("prune_interval", self.prune_interval)?;
        self.reconnect.validate()
    }
}
