//! Prometheus Metrics Definitions
//!
//! Defines all TIDEKV metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge_vec, CounterVec, Encoder,
    HistogramVec, IntGaugeVec, TextEncoder,
};
use tidekv_core::{FeedCursor, KvResult, LogRecord};
use tidekv_storage::{ChangeStream, HydratorStats, LogStore, ResolverStats};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Log store operation latency buckets (seconds)
const LOG_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<TidekvMetrics>> = Lazy::new(TidekvMetrics::new);

fn register_failed(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

/// Container for all TIDEKV metrics.
#[derive(Clone)]
pub struct TidekvMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Log store operation counter - labels: operation, status
    pub log_operations_total: CounterVec,

    /// Log store operation duration histogram - labels: operation
    pub log_operation_duration_seconds: HistogramVec,

    /// Resolver cache lookups since start - labels: outcome (hit, miss, error)
    pub cache_lookups: IntGaugeVec,

    /// Hydrator events since start - labels: kind
    pub hydrator_events: IntGaugeVec,
}

impl TidekvMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "tidekv_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| register_failed("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "tidekv_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| register_failed("http_request_duration_seconds", e))?,

            log_operations_total: register_counter_vec!(
                "tidekv_log_operations_total",
                "Total number of log store operations",
                &["operation", "status"]
            )
            .map_err(|e| register_failed("log_operations_total", e))?,

            log_operation_duration_seconds: register_histogram_vec!(
                "tidekv_log_operation_duration_seconds",
                "Log store operation duration in seconds",
                &["operation"],
                LOG_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| register_failed("log_operation_duration_seconds", e))?,

            cache_lookups: register_int_gauge_vec!(
                "tidekv_cache_lookups",
                "Resolver cache lookups since process start",
                &["outcome"]
            )
            .map_err(|e| register_failed("cache_lookups", e))?,

            hydrator_events: register_int_gauge_vec!(
                "tidekv_hydrator_events",
                "Change feed events handled by the hydrator since process start",
                &["kind"]
            )
            .map_err(|e| register_failed("hydrator_events", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a log store operation.
    pub fn record_log_operation(&self, operation: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.log_operations_total
            .with_label_values(&[operation, status])
            .inc();
        self.log_operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Copy resolver counters into the cache lookup gauges.
    pub fn observe_resolver(&self, stats: &ResolverStats) {
        for (outcome, value) in [
            ("hit", stats.cache_hits),
            ("miss", stats.cache_misses),
            ("error", stats.cache_errors),
        ] {
            self.cache_lookups
                .with_label_values(&[outcome])
                .set(value as i64);
        }
    }

    /// Copy hydrator counters into the hydrator event gauges.
    pub fn observe_hydrator(&self, stats: &HydratorStats) {
        for (kind, value) in [
            ("applied", stats.applied),
            ("deleted", stats.deleted),
            ("stale_skipped", stats.stale_skipped),
            ("duplicate_skipped", stats.duplicate_skipped),
            ("checkpoints", stats.checkpoints),
            ("retired", stats.retired),
            ("malformed", stats.malformed),
            ("cache_failures", stats.cache_failures),
            ("resubscribes", stats.resubscribes),
        ] {
            self.hydrator_events
                .with_label_values(&[kind])
                .set(value as i64);
        }
    }
}

/// Encode every registered metric in Prometheus text format.
pub fn render() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

/// Handler for GET /metrics endpoint.
///
/// Samples resolver and hydrator counters, then returns Prometheus text
/// format metrics.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.observe_resolver(&state.resolver.stats());
        if let Some(hydrator) = &state.hydrator {
            metrics.observe_hydrator(&hydrator.stats());
        }
    }

    match render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

// ============================================================================
// LOG STORE INSTRUMENTATION
// ============================================================================

/// Log store wrapper that records operation counts and latency.
pub struct InstrumentedLogStore {
    inner: Arc<dyn LogStore>,
}

impl InstrumentedLogStore {
    pub fn new(inner: Arc<dyn LogStore>) -> Self {
        Self { inner }
    }

    fn observe<T>(operation: &str, started: Instant, result: &KvResult<T>) {
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.record_log_operation(
                operation,
                result.is_ok(),
                started.elapsed().as_secs_f64(),
            );
        }
    }
}

#[async_trait]
impl LogStore for InstrumentedLogStore {
    async fn append(&self, record: &LogRecord) -> KvResult<()> {
        let started = Instant::now();
        let result = self.inner.append(record).await;
        Self::observe("append", started, &result);
        result
    }

    async fn query_latest(&self, key: &str) -> KvResult<Option<LogRecord>> {
        let started = Instant::now();
        let result = self.inner.query_latest(key).await;
        Self::observe("query_latest", started, &result);
        result
    }

    async fn subscribe_changes(&self, from: Option<&FeedCursor>) -> KvResult<ChangeStream> {
        let started = Instant::now();
        let result = self.inner.subscribe_changes(from).await;
        Self::observe("subscribe", started, &result);
        result
    }

    async fn provision(&self) -> KvResult<()> {
        let started = Instant::now();
        let result = self.inner.provision().await;
        Self::observe("provision", started, &result);
        result
    }
}
