//! Tracing Subscriber Initialization
//!
//! JSON-formatted `tracing` output filtered by `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

const DEFAULT_FILTER: &str = "tidekv_api=debug,tidekv_storage=debug,tower_http=debug,info";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("TIDEKV_SERVICE_NAME")
                .unwrap_or_else(|_| "tidekv-api".to_string()),
            service_version: std::env::var("TIDEKV_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            environment: std::env::var("TIDEKV_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Same settings under a different service name.
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup before any events are emitted. A second call fails
/// rather than replacing the installed subscriber.
pub fn init_tracer(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        service_version = config.service_version,
        environment = config.environment,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_telemetry_config_default() {
        let _name = EnvVarGuard::set("TIDEKV_SERVICE_NAME", None);
        let _env = EnvVarGuard::set("TIDEKV_ENVIRONMENT", Some("staging"));
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "tidekv-api");
        assert_eq!(config.environment, "staging");
        assert!(config.default_filter.contains("tidekv_storage=debug"));
    }

    #[test]
    fn test_for_service_overrides_name() {
        let config = TelemetryConfig::for_service("tidekv-hydrator");
        assert_eq!(config.service_name, "tidekv-hydrator");
    }
}
