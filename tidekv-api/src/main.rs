//! TIDEKV API server.
//!
//! Provisions the log store, optionally runs the cache hydrator in-process,
//! and serves the key-value REST API until ctrl-c.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tidekv_api::telemetry::{init_tracer, TelemetryConfig};
use tidekv_api::{build_cache, build_log_store, create_api_router, ApiConfig, ApiError, ApiResult, AppState};
use tidekv_storage::provision_with_retry;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracer(&TelemetryConfig::default())?;

    let config = ApiConfig::from_env()?;
    let log = build_log_store(&config)?;
    let cache = build_cache(&config)?;

    provision_with_retry(log.as_ref(), &config.provision).await?;

    let hydrator_config = config.hydrator_enabled.then(|| config.hydrator.clone());
    let state = Arc::new(AppState::new(log, cache, config.resolver.clone(), hydrator_config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hydrator_task = state.hydrator.clone().map(|hydrator| {
        tokio::spawn(async move {
            if let Err(e) = hydrator.run(shutdown_rx).await {
                tracing::error!(error = %e, "Hydrator exited with error");
            }
        })
    });

    let app: Router = create_api_router(Arc::clone(&state));

    let addr = resolve_bind_addr(&config)?;
    tracing::info!(
        %addr,
        log_backend = ?config.log_backend,
        cache_backend = ?config.cache_backend,
        hydrator = config.hydrator_enabled,
        "Starting TIDEKV API server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = hydrator_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Hydrator task panicked");
        }
    }

    tracing::info!("TIDEKV API server stopped");
    Ok(())
}

fn resolve_bind_addr(config: &ApiConfig) -> ApiResult<SocketAddr> {
    let addr = config.bind_addr();
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
