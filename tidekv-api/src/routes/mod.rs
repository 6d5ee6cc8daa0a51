//! REST API Routes Module
//!
//! - `/kv/*key` key-value operations
//! - `/health/*` liveness and readiness
//! - `/metrics` Prometheus scrape endpoint

pub mod health;
pub mod kv;

use axum::{middleware::from_fn, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Create the complete API router.
pub fn create_api_router(state: Arc<AppState>) -> Router {
    let metrics = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::clone(&state));

    Router::new()
        .merge(kv::create_router(Arc::clone(&state)))
        .nest("/health", health::create_router(state))
        .merge(metrics)
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
}
