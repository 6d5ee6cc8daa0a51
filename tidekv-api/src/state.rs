//! Shared application state for the HTTP handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tidekv_core::{Clock, HydratorConfig, MonotonicClock, ResolverConfig};
use tidekv_storage::{CacheBackend, Hydrator, LogStore, ReadThroughResolver, VersionGuard, WritePath};

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub resolver: Arc<ReadThroughResolver>,
    pub writer: Arc<WritePath>,
    pub log: Arc<dyn LogStore>,
    pub cache: Arc<dyn CacheBackend>,
    /// Present when this process also runs the hydrator.
    pub hydrator: Option<Arc<Hydrator>>,
    pub log_timeout: Duration,
    pub cache_timeout: Duration,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the resolver, write path and optional hydrator over one log and
    /// one cache. The resolver and hydrator share an applied-version guard.
    pub fn new(
        log: Arc<dyn LogStore>,
        cache: Arc<dyn CacheBackend>,
        resolver_config: ResolverConfig,
        hydrator_config: Option<HydratorConfig>,
    ) -> Self {
        Self::with_clock(
            log,
            cache,
            resolver_config,
            hydrator_config,
            Arc::new(MonotonicClock::new()),
        )
    }

    pub fn with_clock(
        log: Arc<dyn LogStore>,
        cache: Arc<dyn CacheBackend>,
        resolver_config: ResolverConfig,
        hydrator_config: Option<HydratorConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let log_timeout = resolver_config.log_timeout;
        let cache_timeout = resolver_config.cache_timeout;

        let guard = Arc::new(VersionGuard::new());
        let hydrator = hydrator_config.map(|config| {
            let order_guard = config.order_guard;
            let hydrator = Hydrator::new(Arc::clone(&log), Arc::clone(&cache), config)
                .with_version_guard(Arc::clone(&guard));
            (Arc::new(hydrator), order_guard)
        });

        let mut resolver = ReadThroughResolver::new(Arc::clone(&cache), Arc::clone(&log), resolver_config);
        // Without ordered hydration there is nothing to coordinate with.
        if matches!(hydrator, Some((_, true))) {
            resolver = resolver.with_version_guard(guard);
        }

        Self {
            resolver: Arc::new(resolver),
            writer: Arc::new(WritePath::new(Arc::clone(&log), clock, log_timeout)),
            log,
            cache,
            hydrator: hydrator.map(|(hydrator, _)| hydrator),
            log_timeout,
            cache_timeout,
            start_time: Instant::now(),
        }
    }
}
