//! In-memory store for tests and single-process embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. A poisoned lock is
//! reported as [`StoreError::Unavailable`], the same way a lost database
//! connection would be.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::fingerprint::Fingerprint;
use crate::models::{CacheRecord, CacheStats, ConversationTurn, TurnRole};

use super::{ConversionStore, HistoryStore};

/// In-memory implementation of [`ConversionStore`] and [`HistoryStore`].
pub struct InMemoryStore {
    records: RwLock<HashMap<Fingerprint, CacheRecord>>,
    turns: RwLock<Vec<ConversationTurn>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            turns: RwLock::new(Vec::new()),
        }
    }

    /// Number of cache records currently held.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::unavailable("in-memory store lock poisoned")
}

#[async_trait]
impl ConversionStore for InMemoryStore {
    async fn fetch(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(fingerprint).cloned())
    }

    async fn touch(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if let Some(record) = records.get_mut(fingerprint) {
            record.last_accessed = at;
        }
        Ok(())
    }

    async fn upsert(
        &self,
        fingerprint: &Fingerprint,
        file_name: &str,
        file_type: &str,
        markdown: &str,
    ) -> Result<CacheRecord, StoreError> {
        let now = Utc::now();
        let mut records = self.records.write().map_err(poisoned)?;
        let created_at = records
            .get(fingerprint)
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let record = CacheRecord {
            fingerprint: fingerprint.clone(),
            file_name: file_name.to_string(),
            file_type: file_type.to_string(),
            markdown: markdown.to_string(),
            created_at,
            last_accessed: now,
        };
        records.insert(fingerprint.clone(), record.clone());
        Ok(record)
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(CacheStats {
            entries: records.len() as u64,
            markdown_bytes: records.values().map(|r| r.markdown.len() as u64).sum(),
        })
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    async fn append_turn(
        &self,
        session_id: &str,
        role: TurnRole,
        content: &str,
        data: &serde_json::Value,
    ) -> Result<ConversationTurn, StoreError> {
        let turn = ConversationTurn {
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            data: data.clone(),
            created_at: Utc::now(),
        };
        self.turns.write().map_err(poisoned)?.push(turn.clone());
        Ok(turn)
    }

    async fn recent_turns(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let turns = self.turns.read().map_err(poisoned)?;
        let mut recent: Vec<ConversationTurn> = turns
            .iter()
            .rev()
            .filter(|t| t.session_id == session_id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = InMemoryStore::new();
        let fp = fingerprint(b"data", "a.txt", "text/plain");
        store.upsert(&fp, "a.txt", "text/plain", "# A").await.unwrap();

        let record = store.get(&fp).await.unwrap().unwrap();
        assert_eq!(record.markdown, "# A");
        assert_eq!(record.file_name, "a.txt");
        assert_eq!(record.file_type, "text/plain");
    }

    #[tokio::test]
    async fn second_upsert_replaces_text_without_duplicating() {
        let store = InMemoryStore::new();
        let fp = fingerprint(b"data", "a.txt", "text/plain");
        let first = store.upsert(&fp, "a.txt", "text/plain", "old").await.unwrap();
        store.upsert(&fp, "a.txt", "text/plain", "new").await.unwrap();

        let record = store.get(&fp).await.unwrap().unwrap();
        assert_eq!(record.markdown, "new");
        assert_eq!(record.created_at, first.created_at);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_refreshes_last_accessed() {
        let store = InMemoryStore::new();
        let fp = fingerprint(b"data", "a.txt", "text/plain");
        let written = store.upsert(&fp, "a.txt", "text/plain", "x").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let read = store.get(&fp).await.unwrap().unwrap();
        assert!(read.last_accessed > written.last_accessed);
        let stored = store.fetch(&fp).await.unwrap().unwrap();
        assert_eq!(stored.last_accessed, read.last_accessed);
    }

    #[tokio::test]
    async fn missing_fingerprint_is_none() {
        let store = InMemoryStore::new();
        let fp = fingerprint(b"nope", "", "");
        assert!(store.get(&fp).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn stats_sum_markdown_bytes() {
        let store = InMemoryStore::new();
        store
            .upsert(&fingerprint(b"1", "a", ""), "a", "", "abc")
            .await
            .unwrap();
        store
            .upsert(&fingerprint(b"2", "b", ""), "b", "", "de")
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.markdown_bytes, 5);
    }

    #[tokio::test]
    async fn recent_turns_are_chronological_and_scoped() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .append_turn("s1", TurnRole::Human, &format!("q{}", i), &json!({}))
                .await
                .unwrap();
            store
                .append_turn("s2", TurnRole::Agent, "other", &json!({}))
                .await
                .unwrap();
        }
        let recent = store.recent_turns("s1", 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "q3", "q4"]);
        assert!(recent.iter().all(|t| t.session_id == "s1"));
    }
}
