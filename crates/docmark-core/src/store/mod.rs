//! Storage abstractions for docmark.
//!
//! Two traits cover everything the service persists:
//!
//! | Trait | Holds |
//! |-------|-------|
//! | [`ConversionStore`] | Conversion cache records keyed by [`Fingerprint`] |
//! | [`HistoryStore`] | Append-only conversation turns per session |
//!
//! Both are async (via `async-trait`) and must be `Send + Sync`. The
//! in-memory backend in [`memory`] serves tests and embedding; the `docmark`
//! crate provides the SQLite backend.
//!
//! Neither trait swallows errors: every failure surfaces as
//! [`StoreError::Unavailable`]. Callers decide how to degrade.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::StoreError;
use crate::fingerprint::Fingerprint;
use crate::models::{CacheRecord, CacheStats, ConversationTurn, TurnRole};

/// Persistent fingerprint → conversion-result mapping.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`fetch`](ConversionStore::fetch) | Raw read, no side effects |
/// | [`touch`](ConversionStore::touch) | Refresh `last_accessed` |
/// | [`get`](ConversionStore::get) | Read and refresh recency on hit |
/// | [`upsert`](ConversionStore::upsert) | Insert or replace (last writer wins) |
/// | [`stats`](ConversionStore::stats) | Entry count and stored size |
#[async_trait]
pub trait ConversionStore: Send + Sync {
    async fn fetch(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>, StoreError>;

    async fn touch(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Inserts a record or replaces the markdown of an existing one.
    ///
    /// A second write for the same fingerprint overwrites the text and
    /// metadata; `created_at` keeps the first write's time. There is no
    /// version check.
    async fn upsert(
        &self,
        fingerprint: &Fingerprint,
        file_name: &str,
        file_type: &str,
        markdown: &str,
    ) -> Result<CacheRecord, StoreError>;

    async fn stats(&self) -> Result<CacheStats, StoreError>;

    /// Reads a record and, on a hit, bumps its `last_accessed` timestamp.
    ///
    /// The touch is a side effect only: if it fails the failure is logged and
    /// the record is still returned.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>, StoreError> {
        let Some(mut record) = self.fetch(fingerprint).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        match self.touch(fingerprint, now).await {
            Ok(()) => record.last_accessed = now,
            Err(e) => warn!(fingerprint = %fingerprint.short(), "failed to refresh last_accessed: {}", e),
        }
        Ok(Some(record))
    }
}

/// Append-only conversation log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_turn(
        &self,
        session_id: &str,
        role: TurnRole,
        content: &str,
        data: &serde_json::Value,
    ) -> Result<ConversationTurn, StoreError>;

    /// Most recent `limit` turns of a session, oldest first.
    async fn recent_turns(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError>;
}
