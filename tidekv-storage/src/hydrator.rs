//! Change stream consumer.
//!
//! The hydrator follows the log's change feed and mirrors each committed
//! record into the cache: values are set, tombstones delete. It is the only
//! component that brings the cache forward after a write.
//!
//! # Ordering
//!
//! The feed is at-least-once and unordered across keys. With the order
//! guard enabled (the default) every applied record's timestamp is kept in a
//! [`VersionGuard`], and an event older than what the cache reflects is
//! skipped instead of regressing the key. An exact redelivery is skipped; a
//! different payload at the same timestamp is applied. Events without a
//! timestamp are applied unconditionally.
//!
//! # Failure handling
//!
//! Malformed payloads are logged and skipped. A failed cache write is
//! followed by a best-effort delete so readers fall back to the log rather
//! than see a stale value. A disconnect triggers a resubscription from the
//! last safe cursor with capped exponential backoff.
//!
//! # Resume position
//!
//! The feed is only complete below a resolved checkpoint: a row's own
//! `updated` position says nothing about rows still in flight from other
//! ranges. The cursor therefore moves on resolved checkpoints and on
//! positions the store attaches to the event, never on a row payload. The loop runs
//! until the shutdown signal flips to `true` or its sender is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tidekv_core::{
    ChangeEvent, ChangeMessage, Decoded, FeedCursor, HydratorConfig, KvResult,
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::CacheBackend;
use crate::deadline::cache_call;
use crate::log_store::LogStore;
use crate::version_guard::{fingerprint, Admission, VersionGuard};

/// What applying one feed item did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Value written to the cache.
    Set,
    /// Key removed from the cache.
    Deleted,
    /// Older than the version already applied.
    SkippedStale,
    /// Same version and payload as already applied.
    SkippedDuplicate,
    /// Checkpoint or heartbeat, no cache effect.
    Checkpoint,
    /// Log row physically removed, no cache effect.
    Retired,
    /// Payload could not be decoded.
    Malformed,
    /// The cache write failed.
    Failed,
}

/// Snapshot of hydrator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydratorStats {
    pub applied: u64,
    pub deleted: u64,
    pub stale_skipped: u64,
    pub duplicate_skipped: u64,
    pub checkpoints: u64,
    pub retired: u64,
    pub malformed: u64,
    pub cache_failures: u64,
    pub resubscribes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    applied: AtomicU64,
    deleted: AtomicU64,
    stale_skipped: AtomicU64,
    duplicate_skipped: AtomicU64,
    checkpoints: AtomicU64,
    retired: AtomicU64,
    malformed: AtomicU64,
    cache_failures: AtomicU64,
    resubscribes: AtomicU64,
}

impl Counters {
    fn count(&self, outcome: ApplyOutcome) {
        let counter = match outcome {
            ApplyOutcome::Set => &self.applied,
            ApplyOutcome::Deleted => &self.deleted,
            ApplyOutcome::SkippedStale => &self.stale_skipped,
            ApplyOutcome::SkippedDuplicate => &self.duplicate_skipped,
            ApplyOutcome::Checkpoint => &self.checkpoints,
            ApplyOutcome::Retired => &self.retired,
            ApplyOutcome::Malformed => &self.malformed,
            ApplyOutcome::Failed => &self.cache_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HydratorStats {
        HydratorStats {
            applied: self.applied.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            stale_skipped: self.stale_skipped.load(Ordering::Relaxed),
            duplicate_skipped: self.duplicate_skipped.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            cache_failures: self.cache_failures.load(Ordering::Relaxed),
            resubscribes: self.resubscribes.load(Ordering::Relaxed),
        }
    }
}

/// Resolves once shutdown is requested or the signal's sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Change feed consumer that keeps one cache in step with the log.
pub struct Hydrator {
    log: Arc<dyn LogStore>,
    cache: Arc<dyn CacheBackend>,
    guard: Arc<VersionGuard>,
    config: HydratorConfig,
    counters: Counters,
    cursor: Mutex<Option<FeedCursor>>,
}

impl Hydrator {
    pub fn new(
        log: Arc<dyn LogStore>,
        cache: Arc<dyn CacheBackend>,
        config: HydratorConfig,
    ) -> Self {
        Self {
            log,
            cache,
            guard: Arc::new(VersionGuard::new()),
            config,
            counters: Counters::default(),
            cursor: Mutex::new(None),
        }
    }

    /// Use `guard` instead of a private one, so a resolver can share it.
    pub fn with_version_guard(mut self, guard: Arc<VersionGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Start from `cursor` instead of an initial scan.
    pub fn resume_from(self, cursor: FeedCursor) -> Self {
        self.set_cursor(Some(cursor));
        self
    }

    pub fn version_guard(&self) -> Arc<VersionGuard> {
        Arc::clone(&self.guard)
    }

    pub fn stats(&self) -> HydratorStats {
        self.counters.snapshot()
    }

    /// Last position the feed can safely resume from.
    pub fn last_cursor(&self) -> Option<FeedCursor> {
        match self.cursor.lock() {
            Ok(cursor) => cursor.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_cursor(&self, cursor: Option<FeedCursor>) {
        let Some(cursor) = cursor else {
            return;
        };
        match self.cursor.lock() {
            Ok(mut slot) => *slot = Some(cursor),
            Err(poisoned) => *poisoned.into_inner() = Some(cursor),
        }
    }

    /// Follow the change feed until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> KvResult<()> {
        let mut prune = tokio::time::interval(self.config.prune_interval);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempt = 0u32;

        info!(order_guard = self.config.order_guard, "Hydrator starting");
        loop {
            let from = self.last_cursor();
            let subscribed = tokio::select! {
                _ = stopped(&mut shutdown) => break,
                result = self.log.subscribe_changes(from.as_ref()) => result,
            };

            match subscribed {
                Ok(mut feed) => {
                    attempt = 0;
                    info!(cursor = ?from.as_ref().map(FeedCursor::as_str), "Subscribed to change feed");
                    loop {
                        tokio::select! {
                            _ = stopped(&mut shutdown) => {
                                info!("Hydrator stopping");
                                return Ok(());
                            }
                            _ = prune.tick() => {
                                let pruned = self.guard.prune(self.config.guard_retention);
                                if pruned > 0 {
                                    debug!(pruned, "Pruned applied versions");
                                }
                            }
                            item = feed.next() => match item {
                                Some(Ok(event)) => {
                                    self.apply(&event).await;
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "Change feed disconnected");
                                    break;
                                }
                                None => {
                                    warn!("Change feed ended");
                                    break;
                                }
                            }
                        }
                    }
                    self.counters.resubscribes.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Change feed subscription failed");
                }
            }

            let delay = self.config.reconnect.backoff_for(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "Resubscribing after backoff");
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Hydrator stopping");
        Ok(())
    }

    /// Apply one feed item to the cache.
    pub async fn apply(&self, event: &ChangeEvent) -> ApplyOutcome {
        let (outcome, cursor) = self.apply_inner(event).await;
        self.set_cursor(cursor.or_else(|| event.cursor.clone()));
        self.counters.count(outcome);
        outcome
    }

    async fn apply_inner(&self, event: &ChangeEvent) -> (ApplyOutcome, Option<FeedCursor>) {
        let Some(payload) = event.payload.as_deref() else {
            return (ApplyOutcome::Checkpoint, None);
        };

        let message = match ChangeMessage::decode(payload) {
            Ok(Decoded::Record { message, .. }) => message,
            Ok(Decoded::Resolved(cursor)) => return (ApplyOutcome::Checkpoint, Some(cursor)),
            Ok(Decoded::Retired { .. }) => return (ApplyOutcome::Retired, None),
            Err(e) => {
                warn!(error = %e, payload_len = payload.len(), "Skipping malformed change event");
                return (ApplyOutcome::Malformed, None);
            }
        };

        if self.config.order_guard {
            if let Some(timestamp) = message.timestamp {
                let digest = fingerprint(&message.value, message.deleted);
                match self.guard.check(&message.key, timestamp, digest) {
                    Admission::Fresh => {}
                    Admission::Duplicate => {
                        debug!(key = %message.key, %timestamp, "Skipping duplicate change event");
                        return (ApplyOutcome::SkippedDuplicate, None);
                    }
                    Admission::Stale { applied } => {
                        debug!(
                            key = %message.key,
                            %timestamp,
                            %applied,
                            "Skipping stale change event"
                        );
                        return (ApplyOutcome::SkippedStale, None);
                    }
                }
            }
        }

        (self.write_through(&message).await, None)
    }

    async fn write_through(&self, message: &ChangeMessage) -> ApplyOutcome {
        let timeout = self.config.cache_timeout;
        let result = if message.deleted {
            cache_call("delete", timeout, self.cache.delete(&message.key)).await
        } else {
            cache_call("set", timeout, self.cache.set(&message.key, &message.value)).await
        };

        match result {
            Ok(()) => {
                if let Some(timestamp) = message.timestamp {
                    let digest = fingerprint(&message.value, message.deleted);
                    self.guard.record(&message.key, timestamp, digest);
                }
                if message.deleted {
                    debug!(key = %message.key, "Hydrated tombstone");
                    ApplyOutcome::Deleted
                } else {
                    debug!(key = %message.key, "Hydrated value");
                    ApplyOutcome::Set
                }
            }
            Err(e) => {
                warn!(
                    key = %message.key,
                    deleted = message.deleted,
                    error = %e,
                    "Cache update failed during hydration"
                );
                if !message.deleted {
                    // Drop whatever older value is cached so reads go to the log.
                    if let Err(e) =
                        cache_call("delete", timeout, self.cache.delete(&message.key)).await
                    {
                        warn!(key = %message.key, error = %e, "Evicting key after failed set also failed");
                    }
                }
                ApplyOutcome::Failed
            }
        }
    }
}
