//! API Configuration Module
//!
//! Process configuration loaded from environment variables with defaults
//! suitable for a single local node. Database connection settings live in
//! [`crate::db::DbConfig`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tidekv_core::{ConfigError, HydratorConfig, KvResult, ResolverConfig, RetryConfig};

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Which durable log the process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogBackend {
    /// PostgreSQL / CockroachDB `kv_log` table.
    Postgres,
    /// Process-local log. Data is lost on restart.
    Memory,
}

impl FromStr for LogBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "cockroach" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(invalid("TIDEKV_LOG_BACKEND", other, "expected postgres or memory")),
        }
    }
}

/// Which cache backend serves reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Lmdb,
    Memory,
}

impl FromStr for CacheBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lmdb" => Ok(Self::Lmdb),
            "memory" => Ok(Self::Memory),
            other => Err(invalid("TIDEKV_CACHE_BACKEND", other, "expected lmdb or memory")),
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Settings for the API server and the hydrator it runs.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address to bind (`TIDEKV_API_BIND`).
    pub bind: String,
    /// Port to listen on (`PORT`, then `TIDEKV_API_PORT`).
    pub port: u16,

    pub log_backend: LogBackend,
    pub cache_backend: CacheBackendKind,
    /// Directory for the LMDB environment.
    pub lmdb_path: PathBuf,
    /// LMDB map size in megabytes.
    pub lmdb_max_mb: usize,

    pub resolver: ResolverConfig,
    /// Run the hydrator inside the API process.
    pub hydrator_enabled: bool,
    pub hydrator: HydratorConfig,
    /// Retry policy for provisioning the log store at startup.
    pub provision: RetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let resolver = ResolverConfig::default();
        let hydrator = HydratorConfig::default().with_cache_timeout(resolver.cache_timeout);
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            log_backend: LogBackend::Postgres,
            cache_backend: CacheBackendKind::Lmdb,
            lmdb_path: PathBuf::from("./data/tidekv-cache"),
            lmdb_max_mb: 1024,
            resolver,
            hydrator_enabled: true,
            hydrator,
            provision: RetryConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TIDEKV_API_BIND`: bind address (default: 0.0.0.0)
    /// - `PORT` / `TIDEKV_API_PORT`: listen port (default: 8080)
    /// - `TIDEKV_LOG_BACKEND`: postgres | memory (default: postgres)
    /// - `TIDEKV_CACHE_BACKEND`: lmdb | memory (default: lmdb)
    /// - `TIDEKV_LMDB_PATH`, `TIDEKV_LMDB_MAX_MB`
    /// - `TIDEKV_CACHE_TIMEOUT_MS` (default: 50), `TIDEKV_LOG_TIMEOUT_MS` (default: 2000)
    /// - `TIDEKV_DEDUP_MISSES` (default: true)
    /// - `TIDEKV_HYDRATOR_ENABLED` (default: true)
    /// - `TIDEKV_HYDRATOR_BACKOFF_INITIAL_MS`, `TIDEKV_HYDRATOR_BACKOFF_MAX_MS`
    /// - `TIDEKV_HYDRATOR_ORDER_GUARD` (default: true)
    /// - `TIDEKV_HYDRATOR_GUARD_RETENTION_SECS` (default: 3600)
    /// - `TIDEKV_PROVISION_MAX_RETRIES` (default: 10), `TIDEKV_PROVISION_BACKOFF_MS` (default: 2000)
    pub fn from_env() -> KvResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> KvResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = Self::default();

        let port: u16 = match vars.get("PORT") {
            Some(raw) => parse_value("PORT", &raw)?,
            None => vars.parse("TIDEKV_API_PORT", defaults.port)?,
        };

        let resolver = ResolverConfig::default()
            .with_cache_timeout(vars.millis("TIDEKV_CACHE_TIMEOUT_MS", defaults.resolver.cache_timeout)?)
            .with_log_timeout(vars.millis("TIDEKV_LOG_TIMEOUT_MS", defaults.resolver.log_timeout)?)
            .with_dedup(vars.flag("TIDEKV_DEDUP_MISSES", true)?);
        resolver.validate()?;

        let reconnect_defaults = defaults.hydrator.reconnect.clone();
        let reconnect = RetryConfig {
            initial_backoff: vars.millis(
                "TIDEKV_HYDRATOR_BACKOFF_INITIAL_MS",
                reconnect_defaults.initial_backoff,
            )?,
            max_backoff: vars.millis("TIDEKV_HYDRATOR_BACKOFF_MAX_MS", reconnect_defaults.max_backoff)?,
            ..reconnect_defaults
        };
        let hydrator = HydratorConfig::default()
            .with_cache_timeout(resolver.cache_timeout)
            .with_reconnect(reconnect)
            .with_order_guard(vars.flag("TIDEKV_HYDRATOR_ORDER_GUARD", true)?)
            .with_guard_retention(Duration::from_secs(vars.parse(
                "TIDEKV_HYDRATOR_GUARD_RETENTION_SECS",
                defaults.hydrator.guard_retention.as_secs(),
            )?));
        hydrator.validate()?;

        let provision_backoff = vars.millis("TIDEKV_PROVISION_BACKOFF_MS", defaults.provision.initial_backoff)?;
        let provision = RetryConfig {
            max_retries: vars.parse("TIDEKV_PROVISION_MAX_RETRIES", defaults.provision.max_retries)?,
            initial_backoff: provision_backoff,
            // The startup loop waits a fixed interval between attempts.
            max_backoff: provision_backoff,
            backoff_multiplier: 1.0,
        };
        provision.validate()?;

        Ok(Self {
            bind: vars.get("TIDEKV_API_BIND").unwrap_or(defaults.bind),
            port,
            log_backend: vars.parse("TIDEKV_LOG_BACKEND", defaults.log_backend)?,
            cache_backend: vars.parse("TIDEKV_CACHE_BACKEND", defaults.cache_backend)?,
            lmdb_path: vars
                .get("TIDEKV_LMDB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.lmdb_path),
            lmdb_max_mb: vars.parse("TIDEKV_LMDB_MAX_MB", defaults.lmdb_max_mb)?,
            resolver,
            hydrator_enabled: vars.flag("TIDEKV_HYDRATOR_ENABLED", true)?,
            hydrator,
            provision,
        })
    }

    /// `bind:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(field, raw, &e.to_string()))
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-blank value of `name`.
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => parse_value(name, &raw),
            None => Ok(default),
        }
    }

    fn millis(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(name) {
            Some(raw) => parse_value::<u64>(name, &raw).map(Duration::from_millis),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.trim().to_lowercase()) {
            None => Ok(default),
            Some(v) if v == "true" || v == "1" => Ok(true),
            Some(v) if v == "false" || v == "0" => Ok(false),
            Some(v) => Err(invalid(name, &v, "expected true or false")),
        }
    }
}
