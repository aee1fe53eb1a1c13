//! SQLite store.
//!
//! One database file with five tables:
//! - `transcripts` — append-only transcript fragments
//! - `users` — wake-word state (`last_wake_word_ms` is NULL when not pending)
//! - `features` — per-user feature flags
//! - `queries` — extracted queries
//! - `insights` — answers, with a `consumed` flag for downstream readers
//!
//! Timestamps are stored as Unix milliseconds so window queries are plain
//! integer comparisons.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use earshot_core::clock::{Clock, SystemClock, window_start};
use earshot_core::error::StoreError;
use earshot_core::store::Store;
use earshot_core::types::{
    Feature, InsightHistoryEntry, InsightRecord, QueryId, TranscriptFragment, TranscriptWindow,
    UserRecord,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) a database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        Self::with_clock(path, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(path: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to :memory: is its own database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool, clock };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let store = Self { pool, clock };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements: [(&str, &str); 7] = [
            (
                "transcripts table",
                r#"
                CREATE TABLE IF NOT EXISTS transcripts (
                    iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id      TEXT NOT NULL,
                    device_id    TEXT,
                    text         TEXT NOT NULL,
                    language     TEXT,
                    timestamp_ms INTEGER NOT NULL
                )
                "#,
            ),
            (
                "transcripts index",
                "CREATE INDEX IF NOT EXISTS idx_transcripts_user_ts ON transcripts(user_id, timestamp_ms)",
            ),
            (
                "transcripts time index",
                "CREATE INDEX IF NOT EXISTS idx_transcripts_ts ON transcripts(timestamp_ms)",
            ),
            (
                "users table",
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    user_id           TEXT PRIMARY KEY,
                    last_wake_word_ms INTEGER
                )
                "#,
            ),
            (
                "features table",
                r#"
                CREATE TABLE IF NOT EXISTS features (
                    user_id TEXT NOT NULL,
                    feature TEXT NOT NULL,
                    enabled INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (user_id, feature)
                )
                "#,
            ),
            (
                "queries table",
                r#"
                CREATE TABLE IF NOT EXISTS queries (
                    id         TEXT PRIMARY KEY,
                    user_id    TEXT NOT NULL,
                    query      TEXT NOT NULL,
                    created_ms INTEGER NOT NULL
                )
                "#,
            ),
            (
                "insights table",
                r#"
                CREATE TABLE IF NOT EXISTS insights (
                    iid        INTEGER PRIMARY KEY AUTOINCREMENT,
                    id         TEXT UNIQUE NOT NULL,
                    user_id    TEXT NOT NULL,
                    query      TEXT NOT NULL,
                    insight    TEXT NOT NULL,
                    created_ms INTEGER NOT NULL,
                    consumed   INTEGER NOT NULL DEFAULT 0
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, StoreError> {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| StoreError::QueryFailed(format!("timestamp out of range: {ms}")))
    }

    fn row_to_fragment(row: &sqlx::sqlite::SqliteRow) -> Result<TranscriptFragment, StoreError> {
        let ts: i64 = row
            .try_get("timestamp_ms")
            .map_err(|e| StoreError::QueryFailed(format!("timestamp_ms column: {e}")))?;
        Ok(TranscriptFragment {
            user_id: row
                .try_get("user_id")
                .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))?,
            device_id: row
                .try_get("device_id")
                .map_err(|e| StoreError::QueryFailed(format!("device_id column: {e}")))?,
            text: row
                .try_get("text")
                .map_err(|e| StoreError::QueryFailed(format!("text column: {e}")))?,
            language: row
                .try_get("language")
                .map_err(|e| StoreError::QueryFailed(format!("language column: {e}")))?,
            timestamp: Self::millis_to_datetime(ts)?,
        })
    }

    fn row_to_insight(row: &sqlx::sqlite::SqliteRow) -> Result<InsightRecord, StoreError> {
        let created: i64 = row
            .try_get("created_ms")
            .map_err(|e| StoreError::QueryFailed(format!("created_ms column: {e}")))?;
        let consumed: i64 = row
            .try_get("consumed")
            .map_err(|e| StoreError::QueryFailed(format!("consumed column: {e}")))?;
        Ok(InsightRecord {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?,
            user_id: row
                .try_get("user_id")
                .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))?,
            query: row
                .try_get("query")
                .map_err(|e| StoreError::QueryFailed(format!("query column: {e}")))?,
            insight: row
                .try_get("insight")
                .map_err(|e| StoreError::QueryFailed(format!("insight column: {e}")))?,
            created_at: Self::millis_to_datetime(created)?,
            consumed: consumed != 0,
        })
    }

    fn since_ms(&self, window: Duration) -> i64 {
        window_start(self.clock.now(), window).timestamp_millis()
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn is_ready(&self) -> bool {
        if self.pool.is_closed() {
            return false;
        }
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "SQLite store not ready");
                false
            }
        }
    }

    async fn users_with_pending_wake_word(&self) -> Result<Vec<UserRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, last_wake_word_ms FROM users
             WHERE last_wake_word_ms IS NOT NULL
             ORDER BY last_wake_word_ms, user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("pending users: {e}")))?;

        rows.iter()
            .map(|row| -> Result<UserRecord, StoreError> {
                let ms: i64 = row
                    .try_get("last_wake_word_ms")
                    .map_err(|e| StoreError::QueryFailed(format!("last_wake_word_ms: {e}")))?;
                Ok(UserRecord {
                    user_id: row
                        .try_get("user_id")
                        .map_err(|e| StoreError::QueryFailed(format!("user_id: {e}")))?,
                    last_wake_word_time: Self::millis_to_datetime(ms)?,
                })
            })
            .collect()
    }

    async fn recent_transcripts(
        &self,
        window: Duration,
    ) -> Result<Vec<TranscriptFragment>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM transcripts WHERE timestamp_ms >= ?1 ORDER BY timestamp_ms, iid",
        )
        .bind(self.since_ms(window))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("recent transcripts: {e}")))?;

        rows.iter().map(Self::row_to_fragment).collect()
    }

    async fn is_feature_enabled(
        &self,
        user_id: &str,
        feature: Feature,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT enabled FROM features WHERE user_id = ?1 AND feature = ?2")
            .bind(user_id)
            .bind(feature.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("feature lookup: {e}")))?;

        Ok(row
            .and_then(|r| r.try_get::<i64, _>("enabled").ok())
            .is_some_and(|v| v != 0))
    }

    async fn set_feature(
        &self,
        user_id: &str,
        feature: Feature,
        enabled: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO features (user_id, feature, enabled) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, feature) DO UPDATE SET enabled = excluded.enabled",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .bind(i64::from(enabled))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("set feature: {e}")))?;
        Ok(())
    }

    async fn record_wake_word(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (user_id, last_wake_word_ms) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET last_wake_word_ms = excluded.last_wake_word_ms",
        )
        .bind(user_id)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("record wake word: {e}")))?;
        Ok(())
    }

    async fn latest_transcript(
        &self,
        user: &UserRecord,
    ) -> Result<Option<TranscriptFragment>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM transcripts WHERE user_id = ?1
             ORDER BY timestamp_ms DESC, iid DESC LIMIT 1",
        )
        .bind(&user.user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("latest transcript: {e}")))?;

        row.as_ref().map(Self::row_to_fragment).transpose()
    }

    async fn reset_pending(&self, user_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_wake_word_ms = NULL WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("reset pending: {e}")))?;
        Ok(())
    }

    async fn append_transcript(&self, fragment: TranscriptFragment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO transcripts (user_id, device_id, text, language, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&fragment.user_id)
        .bind(&fragment.device_id)
        .bind(&fragment.text)
        .bind(&fragment.language)
        .bind(fragment.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("append transcript: {e}")))?;
        Ok(())
    }

    async fn transcript_window(
        &self,
        user_id: &str,
        lookback: Duration,
    ) -> Result<TranscriptWindow, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM transcripts WHERE user_id = ?1 AND timestamp_ms >= ?2
             ORDER BY timestamp_ms, iid",
        )
        .bind(user_id)
        .bind(self.since_ms(lookback))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("transcript window: {e}")))?;

        let fragments = rows
            .iter()
            .map(Self::row_to_fragment)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TranscriptWindow::from_fragments(&fragments))
    }

    async fn insight_history(
        &self,
        user_id: &str,
        _device_id: Option<&str>,
        include_consumed: bool,
    ) -> Result<Vec<InsightHistoryEntry>, StoreError> {
        // Insights are not device-scoped
        let sql = if include_consumed {
            "SELECT query, insight FROM insights WHERE user_id = ?1 ORDER BY iid"
        } else {
            "SELECT query, insight FROM insights WHERE user_id = ?1 AND consumed = 0 ORDER BY iid"
        };
        let rows = sqlx::query(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("insight history: {e}")))?;

        rows.iter()
            .map(|row| -> Result<InsightHistoryEntry, StoreError> {
                Ok(InsightHistoryEntry {
                    query: row
                        .try_get("query")
                        .map_err(|e| StoreError::QueryFailed(format!("query column: {e}")))?,
                    insight: row
                        .try_get("insight")
                        .map_err(|e| StoreError::QueryFailed(format!("insight column: {e}")))?,
                })
            })
            .collect()
    }

    async fn persist_query(&self, user_id: &str, query: &str) -> Result<QueryId, StoreError> {
        let id = QueryId::new();
        sqlx::query("INSERT INTO queries (id, user_id, query, created_ms) VALUES (?1, ?2, ?3, ?4)")
            .bind(id.to_string())
            .bind(user_id)
            .bind(query)
            .bind(self.clock.now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("persist query: {e}")))?;
        debug!(query_id = %id, user_id = %user_id, "Stored query");
        Ok(id)
    }

    async fn persist_insight(
        &self,
        user_id: &str,
        query: &str,
        insight: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO insights (id, user_id, query, insight, created_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(query)
        .bind(insight)
        .bind(self.clock.now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("persist insight: {e}")))?;
        Ok(())
    }

    async fn take_unconsumed_insights(
        &self,
        user_id: &str,
    ) -> Result<Vec<InsightRecord>, StoreError> {
        let rows = sqlx::query(
            "UPDATE insights SET consumed = 1 WHERE user_id = ?1 AND consumed = 0
             RETURNING iid, id, user_id, query, insight, created_ms, consumed",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("consume insights: {e}")))?;

        let mut taken = rows
            .iter()
            .map(|row| -> Result<(i64, InsightRecord), StoreError> {
                let iid: i64 = row
                    .try_get("iid")
                    .map_err(|e| StoreError::QueryFailed(format!("iid column: {e}")))?;
                Ok((iid, Self::row_to_insight(row)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING order is unspecified
        taken.sort_by_key(|(iid, _)| *iid);
        Ok(taken.into_iter().map(|(_, insight)| insight).collect())
    }

    async fn insights(&self, user_id: &str) -> Result<Vec<InsightRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM insights WHERE user_id = ?1 ORDER BY iid")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("insights: {e}")))?;

        rows.iter().map(Self::row_to_insight).collect()
    }
}
