//! Health Check Endpoints
//!
//! - /health/live - Process alive check
//! - /health/ready - Log store reachability check
//!
//! Readiness depends on the log only. A failing cache is reported as
//! degraded because reads still succeed through the log.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;

use crate::state::AppState;

/// Key queried by the readiness probe. Never written.
const READINESS_SENTINEL_KEY: &str = "__tidekv_readiness__";

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub log: ComponentHealth,
    pub cache: ComponentHealth,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    fn failing(status: HealthStatus, error: String) -> Self {
        Self {
            status,
            latency_ms: None,
            error: Some(error),
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/live - Process liveness check
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready - Readiness check (log store reachability)
pub async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let log = check_log(&state).await;
    let cache = check_cache(&state).await;

    let overall_status = match (log.status, cache.status) {
        (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
        (HealthStatus::Healthy, _) => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    };

    let status_code = if overall_status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let response = HealthResponse {
        status: overall_status,
        message: None,
        details: Some(HealthDetails {
            log,
            cache,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };

    (status_code, Json(response))
}

async fn check_log(state: &AppState) -> ComponentHealth {
    let start = Instant::now();
    match timeout(state.log_timeout, state.log.query_latest(READINESS_SENTINEL_KEY)).await {
        Ok(Ok(_)) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Readiness probe: log store query failed");
            ComponentHealth::failing(HealthStatus::Unhealthy, format!("Log store check failed: {}", e))
        }
        Err(_) => {
            tracing::warn!("Readiness probe: log store query timed out");
            ComponentHealth::failing(HealthStatus::Unhealthy, "Log store check timed out".to_string())
        }
    }
}

async fn check_cache(state: &AppState) -> ComponentHealth {
    let start = Instant::now();
    match timeout(state.cache_timeout, state.cache.get(READINESS_SENTINEL_KEY)).await {
        Ok(Ok(_)) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Ok(Err(e)) => ComponentHealth::failing(HealthStatus::Degraded, format!("Cache check failed: {}", e)),
        Err(_) => ComponentHealth::failing(HealthStatus::Degraded, "Cache check timed out".to_string()),
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() -> Result<(), serde_json::Error> {
        let response = HealthResponse {
            status: HealthStatus::Degraded,
            message: None,
            details: Some(HealthDetails {
                log: ComponentHealth::healthy(3),
                cache: ComponentHealth::failing(HealthStatus::Degraded, "down".to_string()),
                version: "0.1.0".to_string(),
                uptime_seconds: 10,
            }),
        };
        let json = serde_json::to_value(&response)?;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["details"]["log"]["latency_ms"], 3);
        assert!(json.get("message").is_none());
        Ok(())
    }
}
