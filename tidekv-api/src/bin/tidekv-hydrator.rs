//! Standalone cache hydrator.
//!
//! Provisions the log store, then follows its change feed and applies every
//! committed write to the configured cache until ctrl-c. Run one per cache.

use std::sync::Arc;

use tidekv_api::telemetry::{init_tracer, TelemetryConfig};
use tidekv_api::{build_cache, build_log_store, ApiConfig, ApiResult};
use tidekv_storage::{provision_with_retry, Hydrator};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracer(&TelemetryConfig::for_service("tidekv-hydrator"))?;

    let config = ApiConfig::from_env()?;
    let log = build_log_store(&config)?;
    let cache = build_cache(&config)?;

    provision_with_retry(log.as_ref(), &config.provision).await?;

    let hydrator = Arc::new(Hydrator::new(log, cache, config.hydrator.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Dropping the sender would stop the hydrator.
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                let _held = shutdown_tx;
                std::future::pending::<()>().await;
            }
        }
    });

    hydrator.run(shutdown_rx).await?;

    let stats = hydrator.stats();
    tracing::info!(
        applied = stats.applied,
        deleted = stats.deleted,
        stale_skipped = stats.stale_skipped,
        malformed = stats.malformed,
        resubscribes = stats.resubscribes,
        "Hydrator stopped"
    );
    Ok(())
}
