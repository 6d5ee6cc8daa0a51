//! Timeout wrappers for collaborator calls.

use std::future::Future;
use std::time::Duration;

use tidekv_core::{CacheError, KvResult, LogError};

/// Bound a log store call. Expiry becomes [`LogError::Timeout`].
pub(crate) async fn log_call<T, F>(operation: &'static str, limit: Duration, call: F) -> KvResult<T>
where
    F: Future<Output = KvResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LogError::Timeout {
            operation,
            elapsed: limit,
        }
        .into()),
    }
}

/// Bound a cache call. Expiry becomes [`CacheError::Timeout`].
pub(crate) async fn cache_call<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> KvResult<T>
where
    F: Future<Output = KvResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout {
            operation,
            elapsed: limit,
        }
        .into()),
    }
}
