//! SQLite-backed [`ConversionStore`] and [`HistoryStore`].
//!
//! Timestamps are stored as Unix milliseconds. Every `sqlx` error is mapped
//! to [`StoreError::Unavailable`]; this layer never swallows a failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docmark_core::error::StoreError;
use docmark_core::models::{CacheRecord, CacheStats, ConversationTurn, TurnRole};
use docmark_core::store::{ConversionStore, HistoryStore};
use docmark_core::Fingerprint;

/// SQLite implementation of the store traits over the `document_cache` and
/// `messages` tables created by [`crate::migrate`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn ts_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::unavailable(e)
}

fn record_from_row(row: &SqliteRow) -> Result<CacheRecord, StoreError> {
    let hash: String = row.try_get("doc_hash").map_err(unavailable)?;
    let fingerprint = Fingerprint::from_hex(&hash)
        .ok_or_else(|| StoreError::unavailable(format!("corrupt doc_hash in cache: {}", hash)))?;
    Ok(CacheRecord {
        fingerprint,
        file_name: row.try_get("file_name").map_err(unavailable)?,
        file_type: row.try_get("file_type").map_err(unavailable)?,
        markdown: row.try_get("markdown_content").map_err(unavailable)?,
        created_at: ts_from_millis(row.try_get("created_at").map_err(unavailable)?),
        last_accessed: ts_from_millis(row.try_get("last_accessed").map_err(unavailable)?),
    })
}

#[async_trait]
impl ConversionStore for SqliteStore {
    async fn fetch(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT doc_hash, file_name, file_type, markdown_content, created_at, last_accessed FROM document_cache WHERE doc_hash = ?",
        )
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn touch(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE document_cache SET last_accessed = ? WHERE doc_hash = ?")
            .bind(at.timestamp_millis())
            .bind(fingerprint.as_str())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn upsert(
        &self,
        fingerprint: &Fingerprint,
        file_name: &str,
        file_type: &str,
        markdown: &str,
    ) -> Result<CacheRecord, StoreError> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query(
            r#"
            INSERT INTO document_cache (doc_hash, file_name, file_type, markdown_content,
                                        created_at, last_accessed)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(doc_hash) DO UPDATE SET
                file_name = excluded.file_name,
                file_type = excluded.file_type,
                markdown_content = excluded.markdown_content,
                last_accessed = excluded.last_accessed
            RETURNING doc_hash, file_name, file_type, markdown_content, created_at, last_accessed
            "#,
        )
        .bind(fingerprint.as_str())
        .bind(file_name)
        .bind(file_type)
        .bind(markdown)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        record_from_row(&row)
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS entries, COALESCE(SUM(LENGTH(CAST(markdown_content AS BLOB))), 0) AS bytes FROM document_cache",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        let entries: i64 = row.try_get("entries").map_err(unavailable)?;
        let bytes: i64 = row.try_get("bytes").map_err(unavailable)?;
        Ok(CacheStats {
            entries: entries.max(0) as u64,
            markdown_bytes: bytes.max(0) as u64,
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn append_turn(
        &self,
        session_id: &str,
        role: TurnRole,
        content: &str,
        data: &serde_json::Value,
    ) -> Result<ConversationTurn, StoreError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO messages (session_id, message_type, content, data_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(data.to_string())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(ConversationTurn {
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            data: data.clone(),
            created_at: now,
        })
    }

    async fn recent_turns(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, message_type, content, data_json, created_at
            FROM messages
            WHERE session_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let message_type: String = row.try_get("message_type").map_err(unavailable)?;
            let Some(role) = TurnRole::parse(&message_type) else {
                continue;
            };
            let data_json: String = row.try_get("data_json").map_err(unavailable)?;
            turns.push(ConversationTurn {
                session_id: row.try_get("session_id").map_err(unavailable)?,
                role,
                content: row.try_get("content").map_err(unavailable)?,
                data: serde_json::from_str(&data_json).unwrap_or(serde_json::json!({})),
                created_at: ts_from_millis(row.try_get("created_at").map_err(unavailable)?),
            });
        }
        Ok(turns)
    }
}
