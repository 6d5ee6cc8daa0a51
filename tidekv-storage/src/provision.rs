//! One-time log store provisioning with retry.

use tidekv_core::{KvResult, LogError, RetryConfig};
use tracing::{info, warn};

use crate::log_store::LogStore;

/// Run [`LogStore::provision`] until it succeeds or retries run out.
///
/// Makes `1 + max_retries` attempts, sleeping `retry.backoff_for(n)` between
/// them. The last error is reported as [`LogError::ProvisionFailed`].
pub async fn provision_with_retry(log: &dyn LogStore, retry: &RetryConfig) -> KvResult<()> {
    let attempts = retry.max_retries.saturating_add(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match log.provision().await {
            Ok(()) => {
                info!(attempt, "Log store provisioned");
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                let delay = retry.backoff_for(attempt - 1);
                warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Log store provisioning failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(LogError::ProvisionFailed {
                    attempts: attempt,
                    reason: e.to_string(),
                }
                .into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_store::ChangeStream;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tidekv_core::{FeedCursor, KvError, LogRecord};

    /// Fails provisioning a fixed number of times.
    struct FailingProvision {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FailingProvision {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LogStore for FailingProvision {
        async fn append(&self, _record: &LogRecord) -> KvResult<()> {
            Ok(())
        }

        async fn query_latest(&self, _key: &str) -> KvResult<Option<LogRecord>> {
            Ok(None)
        }

        async fn subscribe_changes(&self, _from: Option<&FeedCursor>) -> KvResult<ChangeStream> {
            Ok(Box::pin(futures_util::stream::empty()))
        }

        async fn provision(&self) -> KvResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(LogError::Unavailable {
                    reason: "connection refused".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let log = FailingProvision::new(2);
        provision_with_retry(&log, &fast_retry(5))
            .await
            .expect("provisioning should eventually succeed");
        assert_eq!(log.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let log = FailingProvision::new(10);
        let err = provision_with_retry(&log, &fast_retry(2)).await.unwrap_err();
        assert!(matches!(
            err,
            KvError::Log(LogError::ProvisionFailed { attempts: 3, .. })
        ));
        assert_eq!(log.calls.load(Ordering::SeqCst), 3);
    }
}
