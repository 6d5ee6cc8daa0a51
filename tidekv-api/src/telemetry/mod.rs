//! TIDEKV Telemetry - Observability Infrastructure
//!
//! Structured logging and Prometheus metrics for the API and hydrator
//! binaries. Nothing here talks to an external collector.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, InstrumentedLogStore, TidekvMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, TelemetryConfig};
