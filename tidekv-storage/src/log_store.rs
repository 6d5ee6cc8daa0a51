//! Durable log store collaborator.
//!
//! The log store is the single source of truth. This crate only consumes it
//! through [`LogStore`]; replication and durability belong to the store.
//! [`InMemoryLogStore`] is a process-local implementation with a change feed,
//! used for single-node deployments and tests.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use tidekv_core::{
    resolve_current, ChangeEvent, FeedCursor, KvResult, LogRecord, StreamError,
};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// Stream of change feed items. An `Err` item or the end of the stream means
/// the subscription is gone and must be re-established.
pub type ChangeStream = Pin<Box<dyn Stream<Item = KvResult<ChangeEvent>> + Send>>;

/// Append-only log store.
///
/// Implementations must make `append` atomic and durable before returning,
/// and `query_latest` must return the record with the greatest timestamp
/// for the key (later append wins a tie).
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Durably append one record.
    async fn append(&self, record: &LogRecord) -> KvResult<()>;

    /// Newest record for `key`, tombstone or not.
    async fn query_latest(&self, key: &str) -> KvResult<Option<LogRecord>>;

    /// Subscribe to committed records.
    ///
    /// With `from = None` the feed first replays every retained record, then
    /// continues with live changes. With a cursor it resumes after that
    /// position. Delivery is at-least-once.
    async fn subscribe_changes(&self, from: Option<&FeedCursor>) -> KvResult<ChangeStream>;

    /// Idempotently create whatever the store needs before serving.
    async fn provision(&self) -> KvResult<()> {
        Ok(())
    }
}

/// Items pushed to live subscribers.
#[derive(Debug, Clone)]
enum FeedItem {
    Record(u64, LogRecord),
    Checkpoint(u64),
    Raw(u64, String),
    Disconnect,
}

#[derive(Debug, Default)]
struct LogInner {
    sequence: u64,
    /// Every record in append order with its sequence number.
    entries: Vec<(u64, LogRecord)>,
    /// Positions into `entries` per key.
    by_key: HashMap<String, Vec<usize>>,
}

/// In-process log store.
///
/// Sequence numbers are assigned in append order and double as feed cursors.
#[derive(Debug)]
pub struct InMemoryLogStore {
    inner: RwLock<LogInner>,
    feed: broadcast::Sender<FeedItem>,
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::with_feed_capacity(1024)
    }
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose live feed buffers at most `capacity` items per
    /// subscriber. A subscriber that falls further behind is disconnected.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: RwLock::new(LogInner::default()),
            feed,
        }
    }

    /// Number of records appended so far.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All records for `key` in append order.
    pub async fn history(&self, key: &str) -> Vec<LogRecord> {
        let inner = self.inner.read().await;
        inner
            .by_key
            .get(key)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&pos| inner.entries[pos].1.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Emit a payload-less checkpoint to live subscribers.
    pub async fn checkpoint(&self) {
        let inner = self.inner.read().await;
        let _ = self.feed.send(FeedItem::Checkpoint(inner.sequence));
    }

    /// Push an arbitrary payload to live subscribers without storing it.
    pub async fn inject_raw(&self, payload: impl Into<String>) {
        let inner = self.inner.read().await;
        let _ = self.feed.send(FeedItem::Raw(inner.sequence, payload.into()));
    }

    /// Break every live subscription.
    pub fn disconnect_subscribers(&self) {
        let _ = self.feed.send(FeedItem::Disconnect);
    }

    fn cursor_for(sequence: u64) -> FeedCursor {
        FeedCursor::new(sequence.to_string())
    }

    fn parse_cursor(cursor: &FeedCursor) -> KvResult<u64> {
        cursor.as_str().parse::<u64>().map_err(|_| {
            StreamError::SubscribeFailed {
                reason: format!("invalid cursor '{}'", cursor),
            }
            .into()
        })
    }

    fn live_event(item: Result<FeedItem, BroadcastStreamRecvError>) -> KvResult<ChangeEvent> {
        match item {
            Ok(FeedItem::Record(seq, record)) => {
                Ok(ChangeEvent::from_record(&record, Some(Self::cursor_for(seq))))
            }
            Ok(FeedItem::Checkpoint(seq)) => {
                Ok(ChangeEvent::checkpoint(Some(Self::cursor_for(seq))))
            }
            Ok(FeedItem::Raw(seq, payload)) => {
                Ok(ChangeEvent::data(payload, Some(Self::cursor_for(seq))))
            }
            Ok(FeedItem::Disconnect) => Err(StreamError::Disconnected {
                reason: "subscription closed by store".to_string(),
            }
            .into()),
            Err(BroadcastStreamRecvError::Lagged(missed)) => Err(StreamError::Disconnected {
                reason: format!("subscriber lagged behind by {} events", missed),
            }
            .into()),
        }
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, record: &LogRecord) -> KvResult<()> {
        let mut inner = self.inner.write().await;
        inner.sequence += 1;
        let sequence = inner.sequence;
        let position = inner.entries.len();
        inner.entries.push((sequence, record.clone()));
        inner
            .by_key
            .entry(record.key.clone())
            .or_default()
            .push(position);

        // Published under the write lock so subscribers never miss or
        // double-count a record relative to their backlog snapshot.
        let _ = self.feed.send(FeedItem::Record(sequence, record.clone()));
        Ok(())
    }

    async fn query_latest(&self, key: &str) -> KvResult<Option<LogRecord>> {
        let inner = self.inner.read().await;
        let Some(positions) = inner.by_key.get(key) else {
            return Ok(None);
        };
        let state = resolve_current(positions.iter().map(|&pos| &inner.entries[pos].1));
        Ok(state.into_latest())
    }

    async fn subscribe_changes(&self, from: Option<&FeedCursor>) -> KvResult<ChangeStream> {
        let after = match from {
            Some(cursor) => Self::parse_cursor(cursor)?,
            None => 0,
        };

        let inner = self.inner.read().await;
        let backlog: Vec<KvResult<ChangeEvent>> = inner
            .entries
            .iter()
            .filter(|(seq, _)| *seq > after)
            .map(|(seq, record)| Ok(ChangeEvent::from_record(record, Some(Self::cursor_for(*seq)))))
            .collect();
        let live = BroadcastStream::new(self.feed.subscribe());
        drop(inner);

        let stream = stream::iter(backlog).chain(live.map(Self::live_event));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tidekv_core::{ChangeMessage, Decoded};

    fn at(secs: i64) -> tidekv_core::Timestamp {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn key_of(event: &ChangeEvent) -> String {
        match ChangeMessage::decode(event.payload.as_deref().unwrap()).unwrap() {
            Decoded::Record { message, .. } => message.key,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_latest_missing_key() -> KvResult<()> {
        let store = InMemoryLogStore::new();
        assert_eq!(store.query_latest("nope").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_last_write_wins_by_timestamp_not_insertion() -> KvResult<()> {
        let store = InMemoryLogStore::new();
        store.append(&LogRecord::put("k", "newer", at(2))).await?;
        store.append(&LogRecord::put("k", "older", at(1))).await?;

        let latest = store.query_latest("k").await?.unwrap();
        assert_eq!(latest.value, "newer");
        assert_eq!(store.history("k").await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_tombstone_is_latest_after_delete() -> KvResult<()> {
        let store = InMemoryLogStore::new();
        store.append(&LogRecord::put("k", "v", at(1))).await?;
        store.append(&LogRecord::tombstone("k", at(2))).await?;

        let latest = store.query_latest("k").await?.unwrap();
        assert!(latest.deleted);
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_follows() -> KvResult<()> {
        let store = InMemoryLogStore::new();
        store.append(&LogRecord::put("a", "1", at(1))).await?;

        let mut feed = store.subscribe_changes(None).await?;
        store.append(&LogRecord::put("b", "2", at(2))).await?;

        let first = feed.next().await.unwrap()?;
        assert_eq!(key_of(&first), "a");
        assert_eq!(first.cursor, Some(FeedCursor::new("1")));

        let second = feed.next().await.unwrap()?;
        assert_eq!(key_of(&second), "b");
        assert_eq!(second.cursor, Some(FeedCursor::new("2")));
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_resumes_after_cursor() -> KvResult<()> {
        let store = InMemoryLogStore::new();
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            store.append(&LogRecord::put(*key, "v", at(i as i64))).await?;
        }

        let mut feed = store.subscribe_changes(Some(&FeedCursor::new("2"))).await?;
        let event = feed.next().await.unwrap()?;
        assert_eq!(key_of(&event), "c");
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_cursor_rejected() {
        let store = InMemoryLogStore::new();
        let result = store
            .subscribe_changes(Some(&FeedCursor::new("not-a-number")))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_checkpoint_and_disconnect() -> KvResult<()> {
        let store = InMemoryLogStore::new();
        let mut feed = store.subscribe_changes(None).await?;

        store.checkpoint().await;
        let checkpoint = feed.next().await.unwrap()?;
        assert!(checkpoint.is_checkpoint());

        store.disconnect_subscribers();
        assert!(feed.next().await.unwrap().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_disconnected() -> KvResult<()> {
        let store = InMemoryLogStore::with_feed_capacity(2);
        let mut feed = store.subscribe_changes(None).await?;
        for i in 0..5 {
            store.append(&LogRecord::put("k", i.to_string(), at(i))).await?;
        }
        assert!(feed.next().await.unwrap().is_err());
        Ok(())
    }
}
