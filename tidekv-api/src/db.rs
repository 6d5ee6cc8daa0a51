//! PostgreSQL / CockroachDB Log Store
//!
//! The durable log lives in one append-only table, `kv_log`. Appends and
//! latest-record queries go through a `deadpool-postgres` pool. The change
//! feed is a CockroachDB sinkless changefeed read over a dedicated
//! connection, one row per change.
//!
//! The `seq` column breaks timestamp ties so that the later append wins.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use futures_util::StreamExt;
use std::time::Duration;
use tidekv_core::{ChangeEvent, FeedCursor, KvError, KvResult, LogError, LogRecord, StreamError};
use tidekv_storage::{ChangeStream, LogStore};
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};

const DEFAULT_DATABASE_URL: &str = "postgresql://root@localhost:26257/defaultdb?sslmode=disable";

const CREATE_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS kv_log (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        seq BIGSERIAL,
        key TEXT NOT NULL,
        value TEXT,
        timestamp TIMESTAMPTZ NOT NULL,
        deleted BOOL DEFAULT FALSE
    );
    ALTER TABLE kv_log ADD COLUMN IF NOT EXISTS seq BIGSERIAL;
    CREATE INDEX IF NOT EXISTS idx_key_timestamp ON kv_log (key, timestamp DESC);
";

const ENABLE_RANGEFEED_SQL: &str = "SET CLUSTER SETTING kv.rangefeed.enabled = true";

const APPEND_SQL: &str =
    "INSERT INTO kv_log (key, value, timestamp, deleted) VALUES ($1, $2, $3, $4)";

const LATEST_SQL: &str = "
    SELECT key, value, timestamp, deleted FROM kv_log
    WHERE key = $1
    ORDER BY timestamp DESC, seq DESC
    LIMIT 1
";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection URL (`postgresql://user@host:port/db?sslmode=...`)
    pub url: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long a caller waits for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// - `DATABASE_URL` (default: local single-node CockroachDB)
    /// - `TIDEKV_DB_POOL_SIZE` (default: 16)
    /// - `TIDEKV_DB_TIMEOUT` seconds (default: 30)
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_size: std::env::var("TIDEKV_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("TIDEKV_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.url = Some(self.url.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::internal_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// LOG STORE
// ============================================================================

fn query_failed(operation: &'static str, e: tokio_postgres::Error) -> KvError {
    LogError::QueryFailed {
        operation,
        reason: e.to_string(),
    }
    .into()
}

/// Resolved timestamps are HLC values (`<wall nanos>.<logical>`). Anything
/// else is refused before it reaches the SQL text.
fn validate_cursor(cursor: &FeedCursor) -> KvResult<&str> {
    let raw = cursor.as_str();
    let valid = !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit() || c == '.');
    if valid {
        Ok(raw)
    } else {
        Err(StreamError::SubscribeFailed {
            reason: format!("invalid changefeed cursor '{}'", raw),
        }
        .into())
    }
}

/// `CREATE CHANGEFEED` statement, resuming after `from` when given.
pub fn changefeed_sql(from: Option<&FeedCursor>) -> KvResult<String> {
    let mut sql = String::from(
        "CREATE CHANGEFEED FOR TABLE kv_log WITH updated, resolved, format = json, envelope = wrapped",
    );
    if let Some(cursor) = from {
        sql.push_str(&format!(", cursor = '{}'", validate_cursor(cursor)?));
    }
    Ok(sql)
}

/// Changefeed payload carried by a `value` column.
///
/// The text protocol renders the column as hex bytea. Text that does not
/// decode is passed through unchanged and fails payload decoding later.
fn value_payload(raw: &str) -> String {
    let Some(encoded) = raw.strip_prefix("\\x") else {
        return raw.to_string();
    };
    match hex::decode(encoded).map(String::from_utf8) {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            warn!(error = %e, "Changefeed value is not UTF-8");
            raw.to_string()
        }
        Err(e) => {
            warn!(error = %e, "Changefeed value is not valid hex");
            raw.to_string()
        }
    }
}

/// Map one changefeed row (`topic`, `key`, `value`) to a feed item.
fn row_event(message: SimpleQueryMessage) -> Option<ChangeEvent> {
    match message {
        SimpleQueryMessage::Row(row) => match row.try_get(2) {
            Ok(Some(value)) => Some(ChangeEvent::data(value_payload(value), None)),
            Ok(None) => Some(ChangeEvent::checkpoint(None)),
            Err(e) => {
                warn!(error = %e, "Changefeed row without a value column");
                Some(ChangeEvent::checkpoint(None))
            }
        },
        _ => None,
    }
}

/// `LogStore` over a `kv_log` table.
#[derive(Clone)]
pub struct PgLogStore {
    pool: Pool,
    url: String,
}

impl PgLogStore {
    pub fn new(pool: Pool, url: impl Into<String>) -> Self {
        Self {
            pool,
            url: url.into(),
        }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(config.create_pool()?, config.url.clone()))
    }

    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> KvResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            LogError::Unavailable {
                reason: format!("Failed to get connection: {}", e),
            }
            .into()
        })
    }
}

#[async_trait]
impl LogStore for PgLogStore {
    async fn append(&self, record: &LogRecord) -> KvResult<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            APPEND_SQL,
            &[&record.key, &record.value, &record.timestamp, &record.deleted],
        )
        .await
        .map_err(|e| query_failed("append", e))?;
        Ok(())
    }

    async fn query_latest(&self, key: &str) -> KvResult<Option<LogRecord>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(LATEST_SQL, &[&key])
            .await
            .map_err(|e| query_failed("query_latest", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: Option<String> = row.try_get(1).map_err(|e| query_failed("query_latest", e))?;
        let deleted: Option<bool> = row.try_get(3).map_err(|e| query_failed("query_latest", e))?;
        Ok(Some(LogRecord {
            key: row.try_get(0).map_err(|e| query_failed("query_latest", e))?,
            value: value.unwrap_or_default(),
            timestamp: row.try_get(2).map_err(|e| query_failed("query_latest", e))?,
            deleted: deleted.unwrap_or(false),
        }))
    }

    async fn subscribe_changes(&self, from: Option<&FeedCursor>) -> KvResult<ChangeStream> {
        let sql = changefeed_sql(from)?;

        // Changefeeds hold their connection for their whole lifetime, so they
        // never borrow from the pool.
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
            .await
            .map_err(|e| StreamError::SubscribeFailed {
                reason: e.to_string(),
            })?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "Changefeed connection closed");
            }
        });

        let rows = client
            .simple_query_raw(&sql)
            .await
            .map_err(|e| StreamError::SubscribeFailed {
                reason: e.to_string(),
            })?;
        info!(cursor = ?from.map(FeedCursor::as_str), "Changefeed started");

        let stream = rows.filter_map(move |message| {
            // The stream owns the client; dropping the stream ends the feed.
            let _client = &client;
            let item: Option<KvResult<ChangeEvent>> = match message {
                Ok(message) => row_event(message).map(Ok),
                Err(e) => {
                    debug!(error = %e, "Changefeed stream error");
                    Some(Err(StreamError::Disconnected {
                        reason: e.to_string(),
                    }
                    .into()))
                }
            };
            futures_util::future::ready(item)
        });
        Ok(Box::pin(stream))
    }

    async fn provision(&self) -> KvResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(CREATE_TABLE_SQL)
            .await
            .map_err(|e| query_failed("provision", e))?;
        info!("Table 'kv_log' ensured to exist");

        if let Err(e) = conn.batch_execute(ENABLE_RANGEFEED_SQL).await {
            warn!(error = %e, "Could not enable kv.rangefeed.enabled (might already be set)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidekv_core::{ChangeMessage, Decoded};

    #[test]
    fn test_changefeed_sql_without_cursor() -> KvResult<()> {
        let sql = changefeed_sql(None)?;
        assert!(sql.starts_with("CREATE CHANGEFEED FOR TABLE kv_log"));
        assert!(sql.contains("envelope = wrapped"));
        assert!(!sql.contains("cursor"));
        Ok(())
    }

    #[test]
    fn test_changefeed_sql_resumes_from_cursor() -> KvResult<()> {
        let cursor = FeedCursor::new("1700000000000000000.0000000001");
        let sql = changefeed_sql(Some(&cursor))?;
        assert!(sql.ends_with(", cursor = '1700000000000000000.0000000001'"));
        Ok(())
    }

    #[test]
    fn test_changefeed_sql_rejects_injected_cursor() {
        let cursor = FeedCursor::new("1'; DROP TABLE kv_log; --");
        assert!(matches!(
            changefeed_sql(Some(&cursor)),
            Err(KvError::Stream(StreamError::SubscribeFailed { .. }))
        ));
    }

    fn to_bytea(payload: &str) -> String {
        format!("\\x{}", hex::encode(payload))
    }

    #[test]
    fn test_value_payload_decodes_hex_bytea() {
        let wrapped = r#"{"after":{"key":"k","value":"v","deleted":false},"updated":"1.0"}"#;
        let payload = value_payload(&to_bytea(wrapped));
        assert_eq!(payload, wrapped);

        match ChangeMessage::decode(&payload) {
            Ok(Decoded::Record { message, .. }) => {
                assert_eq!(message.key, "k");
                assert_eq!(message.value, "v");
                assert!(!message.deleted);
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_value_payload_decodes_resolved_mark() {
        let payload = value_payload(&to_bytea(r#"{"resolved":"1700000000000000000.0000000000"}"#));
        assert!(matches!(
            ChangeMessage::decode(&payload),
            Ok(Decoded::Resolved(_))
        ));
    }

    #[test]
    fn test_value_payload_passes_through_plain_and_invalid_text() {
        let plain = r#"{"resolved":"1.0"}"#;
        assert_eq!(value_payload(plain), plain);
        assert_eq!(value_payload("\\x7"), "\\x7");
        assert_eq!(value_payload("\\xzz"), "\\xzz");
        assert_eq!(value_payload("\\x+f"), "\\x+f");
        // Valid hex, invalid UTF-8.
        assert_eq!(value_payload("\\xff"), "\\xff");
    }

    #[test]
    fn test_db_config_default() {
        let config = DbConfig::default();
        assert!(config.url.contains("26257"));
        assert_eq!(config.max_size, 16);
    }
}
