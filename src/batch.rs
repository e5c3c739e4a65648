//! Batch orchestration and the two agent modes.
//!
//! | Mode | Method | Language model |
//! |------|--------|----------------|
//! | Convert | [`BatchOrchestrator::resolve_batch`] | vision only |
//! | Agent | [`BatchOrchestrator::answer`] | one completion per query |
//! | Context | [`BatchOrchestrator::context`] | none |
//!
//! Every document in a batch is resolved independently: one failure is
//! recorded in its [`DocumentOutcome`] and never aborts the rest. Outcomes
//! always come back in input order, whatever `batch.concurrency` is.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use docmark_core::assemble::{build_agent_prompt, render_file_context};
use docmark_core::capability::LanguageModel;
use docmark_core::error::{ConversionError, LlmError};
use docmark_core::models::{BatchResult, DocumentOutcome, OutcomeStatus};
use docmark_core::{Document, TurnRole};

use crate::cache::ConversionCache;
use crate::history::HistoryRecorder;

/// Agent reply stored when the language model call fails.
pub const APOLOGY: &str = "I apologize, but I encountered an error processing your request.";

/// One entry of a submitted batch.
#[derive(Debug, Clone)]
pub enum BatchItem {
    Ready(Document),
    /// The payload never became a document (for example, bad base64).
    Rejected { name: String, error: ConversionError },
}

impl BatchItem {
    pub fn name(&self) -> &str {
        match self {
            BatchItem::Ready(doc) => &doc.name,
            BatchItem::Rejected { name, .. } => name,
        }
    }
}

impl From<Document> for BatchItem {
    fn from(doc: Document) -> Self {
        BatchItem::Ready(doc)
    }
}

/// A question about a set of documents within a session.
#[derive(Debug, Clone)]
pub struct AgentQuery {
    pub query: String,
    pub session_id: String,
    pub user_id: String,
    pub request_id: String,
    pub items: Vec<BatchItem>,
    pub use_cache: bool,
}

#[derive(Debug, Clone)]
pub struct AgentAnswer {
    pub answer: String,
    pub batch: BatchResult,
}

#[derive(Debug, Clone)]
pub struct ContextReply {
    pub markdown: String,
    pub batch: BatchResult,
}

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// No document could be converted, so there is nothing to ask about.
    #[error("{reason}")]
    BatchExhausted { reason: String, batch: BatchResult },

    /// Documents converted but the language model call failed.
    #[error("Error generating answer: {error}")]
    Llm { error: LlmError, batch: BatchResult },
}

impl AgentError {
    pub fn batch(&self) -> &BatchResult {
        match self {
            AgentError::BatchExhausted { batch, .. } | AgentError::Llm { batch, .. } => batch,
        }
    }
}

fn human_turn_data(query: &AgentQuery) -> Value {
    let files: Vec<&str> = query.items.iter().map(BatchItem::name).collect();
    json!({
        "request_id": query.request_id,
        "user_id": query.user_id,
        "files": files,
    })
}

pub struct BatchOrchestrator {
    cache: ConversionCache,
    llm: Arc<dyn LanguageModel>,
    history: HistoryRecorder,
    concurrency: usize,
    llm_timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        cache: ConversionCache,
        llm: Arc<dyn LanguageModel>,
        history: HistoryRecorder,
        concurrency: usize,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            llm,
            history,
            concurrency: concurrency.max(1),
            llm_timeout,
        }
    }

    pub fn cache(&self) -> &ConversionCache {
        &self.cache
    }

    /// Resolves every item, keeping input order in the outcomes and the
    /// combined markdown.
    pub async fn resolve_batch(&self, items: Vec<BatchItem>, use_cache: bool) -> BatchResult {
        let total = items.len();
        let cache = &self.cache;

        let outcomes: Vec<DocumentOutcome> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| async move {
                let status = match &item {
                    BatchItem::Ready(doc) => match cache.resolve(doc, use_cache).await {
                        Ok(resolution) => OutcomeStatus::Converted {
                            markdown: resolution.markdown,
                            source: resolution.source,
                        },
                        Err(e) => OutcomeStatus::Failed {
                            reason: e.to_string(),
                        },
                    },
                    BatchItem::Rejected { error, .. } => OutcomeStatus::Failed {
                        reason: error.to_string(),
                    },
                };
                if let OutcomeStatus::Failed { reason } = &status {
                    warn!(name = %item.name(), "document failed: {}", reason);
                }
                DocumentOutcome {
                    index,
                    name: item.name().to_string(),
                    status,
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let result = BatchResult::from_outcomes(outcomes);
        info!(
            total,
            succeeded = result.succeeded(),
            failed = result.failed(),
            "batch resolved"
        );
        result
    }

    /// Answers a question over the batch with the language model, recording
    /// both sides of the exchange in the session history.
    pub async fn answer(&self, query: AgentQuery) -> Result<AgentAnswer, AgentError> {
        let human_data = human_turn_data(&query);
        let batch = self.resolve_batch(query.items, query.use_cache).await;
        if batch.is_exhausted() {
            return Err(AgentError::BatchExhausted {
                reason: batch.failure_summary(),
                batch,
            });
        }

        self.history
            .record(&query.session_id, TurnRole::Human, &query.query, human_data)
            .await;
        let history = self.history.recent(&query.session_id).await;
        let prompt = build_agent_prompt(&batch.combined_markdown, &history, &query.query);

        let completion = match tokio::time::timeout(self.llm_timeout, self.llm.complete(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                secs: self.llm_timeout.as_secs(),
            }),
        };

        match completion {
            Ok(answer) => {
                self.history
                    .record(
                        &query.session_id,
                        TurnRole::Agent,
                        &answer,
                        json!({ "request_id": query.request_id }),
                    )
                    .await;
                Ok(AgentAnswer { answer, batch })
            }
            Err(error) => {
                warn!(session = %query.session_id, "agent completion failed: {}", error);
                self.history
                    .record(
                        &query.session_id,
                        TurnRole::Agent,
                        APOLOGY,
                        json!({ "error": error.to_string(), "request_id": query.request_id }),
                    )
                    .await;
                Err(AgentError::Llm { error, batch })
            }
        }
    }

    /// Renders the batch as a numbered context listing without calling the
    /// language model. Both the query and the rendered context are recorded.
    pub async fn context(&self, query: AgentQuery) -> ContextReply {
        self.history
            .record(
                &query.session_id,
                TurnRole::Human,
                &query.query,
                human_turn_data(&query),
            )
            .await;

        let batch = self.resolve_batch(query.items, query.use_cache).await;
        let markdown = render_file_context(&batch.outcomes);

        self.history
            .record(
                &query.session_id,
                TurnRole::Agent,
                &markdown,
                json!({ "request_id": query.request_id }),
            )
            .await;
        ContextReply { markdown, batch }
    }
}
