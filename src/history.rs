//! Best-effort session history.
//!
//! History is a side channel. A failed write is swallowed (logged at debug
//! level only) and a failed read yields an empty history; either way the
//! request carries on. Cache write failures, by contrast, are logged as
//! errors in [`crate::cache`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use docmark_core::assemble::truncate_content;
use docmark_core::store::HistoryStore;
use docmark_core::{ConversationTurn, TurnRole};

use crate::config::HistoryConfig;

#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
    limit: usize,
    max_content_chars: usize,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>, config: &HistoryConfig) -> Self {
        Self {
            store,
            limit: config.limit,
            max_content_chars: config.max_content_chars,
        }
    }

    /// Appends a turn, truncating oversized content. Returns the stored turn,
    /// or `None` if the store rejected it.
    pub async fn record(
        &self,
        session_id: &str,
        role: TurnRole,
        content: &str,
        data: Value,
    ) -> Option<ConversationTurn> {
        let (content, truncated) = truncate_content(content, self.max_content_chars);
        if truncated {
            warn!(
                session = %session_id,
                "truncated {} turn to {} chars",
                role.as_str(),
                self.max_content_chars
            );
        }
        match self
            .store
            .append_turn(session_id, role, &content, &data)
            .await
        {
            Ok(turn) => Some(turn),
            Err(e) => {
                debug!(session = %session_id, "dropped {} turn: {}", role.as_str(), e);
                None
            }
        }
    }

    /// The most recent turns of a session, oldest first. Empty on failure.
    pub async fn recent(&self, session_id: &str) -> Vec<ConversationTurn> {
        match self.store.recent_turns(session_id, self.limit).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(session = %session_id, "failed to load history: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docmark_core::error::StoreError;
    use docmark_core::store::memory::InMemoryStore;
    use serde_json::json;

    struct BrokenHistory;

    #[async_trait]
    impl HistoryStore for BrokenHistory {
        async fn append_turn(
            &self,
            _session_id: &str,
            _role: TurnRole,
            _content: &str,
            _data: &Value,
        ) -> Result<ConversationTurn, StoreError> {
            Err(StoreError::unavailable("disk full"))
        }

        async fn recent_turns(
            &self,
            _session_id: &str,
            _limit: usize,
        ) -> Result<Vec<ConversationTurn>, StoreError> {
            Err(StoreError::unavailable("disk full"))
        }
    }

    fn config(limit: usize, max_content_chars: usize) -> HistoryConfig {
        HistoryConfig {
            limit,
            max_content_chars,
        }
    }

    #[tokio::test]
    async fn truncates_long_content() {
        let recorder = HistoryRecorder::new(Arc::new(InMemoryStore::new()), &config(10, 5));
        let turn = recorder
            .record("s", TurnRole::Agent, "abcdefghij", json!({}))
            .await
            .unwrap();
        assert_eq!(turn.content, "abcde\n...(truncated)");
    }

    #[tokio::test]
    async fn window_is_limited_and_chronological() {
        let recorder = HistoryRecorder::new(Arc::new(InMemoryStore::new()), &config(2, 100));
        for text in ["one", "two", "three"] {
            recorder.record("s", TurnRole::Human, text, json!({})).await;
        }
        let contents: Vec<String> = recorder
            .recent("s")
            .await
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let recorder = HistoryRecorder::new(Arc::new(BrokenHistory), &config(10, 100));
        assert!(recorder
            .record("s", TurnRole::Human, "hi", json!({}))
            .await
            .is_none());
        assert!(recorder.recent("s").await.is_empty());
    }
}
