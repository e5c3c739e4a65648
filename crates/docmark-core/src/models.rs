//! Core data models shared by the cache, the batch orchestrator, and the
//! HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// A document submitted for conversion.
///
/// Transient: only its fingerprint and converted markdown are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Raw file bytes (already base64-decoded).
    pub content: Vec<u8>,
    /// Display name, usually the original file name.
    pub name: String,
    /// Declared media type, e.g. `application/pdf`.
    pub content_type: String,
    /// Requested vision model for image inputs.
    pub model: Option<String>,
}

impl Document {
    pub fn new(
        content: impl Into<Vec<u8>>,
        name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            name: name.into(),
            content_type: content_type.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Lowercased file extension taken from `name`, if any.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Persisted conversion result, keyed by [`Fingerprint`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheRecord {
    pub fingerprint: Fingerprint,
    pub file_name: String,
    pub file_type: String,
    pub markdown: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Aggregate numbers for the conversion cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub markdown_bytes: u64,
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Human,
    Agent,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::Human => "human",
            TurnRole::Agent => "agent",
        }
    }

    /// Parses the stored form. `user`/`assistant`/`ai` are accepted as
    /// aliases written by older clients.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human" | "user" => Some(TurnRole::Human),
            "agent" | "assistant" | "ai" => Some(TurnRole::Agent),
            _ => None,
        }
    }

    /// Label used when replaying history to a chat model.
    pub fn chat_label(&self) -> &'static str {
        match self {
            TurnRole::Human => "user",
            TurnRole::Agent => "assistant",
        }
    }
}

/// One append-only entry in a session's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub session_id: String,
    pub role: TurnRole,
    pub content: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Where a resolved document's markdown came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Served from the conversion store.
    Cache,
    /// Produced by the converter.
    Converted,
    /// Converter failed; raw bytes decoded as UTF-8.
    PlainText,
}

/// Result of resolving a single document to markdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub fingerprint: Fingerprint,
    pub markdown: String,
    pub source: ResolutionSource,
}

/// Per-document outcome inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Converted {
        #[serde(skip)]
        markdown: String,
        source: ResolutionSource,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOutcome {
    pub index: usize,
    pub name: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl DocumentOutcome {
    pub fn markdown(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Converted { markdown, .. } => Some(markdown),
            OutcomeStatus::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Converted { .. })
    }
}

/// Ordered outcomes of one batch plus the derived combined markdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub outcomes: Vec<DocumentOutcome>,
    pub combined_markdown: String,
}

impl BatchResult {
    /// Builds the result, deriving the combined markdown from successes in
    /// input order.
    pub fn from_outcomes(outcomes: Vec<DocumentOutcome>) -> Self {
        let combined_markdown = crate::assemble::join_markdown(
            outcomes.iter().filter_map(DocumentOutcome::markdown),
        );
        Self {
            outcomes,
            combined_markdown,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// True when nothing could be converted (including the empty batch).
    pub fn is_exhausted(&self) -> bool {
        self.succeeded() == 0
    }

    /// Human-readable reason aggregating every per-item failure.
    pub fn failure_summary(&self) -> String {
        if self.outcomes.is_empty() {
            return "No files provided. Please provide at least one file to process.".to_string();
        }
        let reasons: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.status {
                OutcomeStatus::Failed { reason } => Some(format!("{}: {}", o.name, reason)),
                OutcomeStatus::Converted { .. } => None,
            })
            .collect();
        format!(
            "Failed to process {} of {} files: {}",
            reasons.len(),
            self.outcomes.len(),
            reasons.join("; ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converted(index: usize, name: &str, md: &str) -> DocumentOutcome {
        DocumentOutcome {
            index,
            name: name.to_string(),
            status: OutcomeStatus::Converted {
                markdown: md.to_string(),
                source: ResolutionSource::Converted,
            },
        }
    }

    fn failed(index: usize, name: &str) -> DocumentOutcome {
        DocumentOutcome {
            index,
            name: name.to_string(),
            status: OutcomeStatus::Failed {
                reason: "unreadable".to_string(),
            },
        }
    }

    #[test]
    fn extension_is_lowercased() {
        let doc = Document::new(b"x".to_vec(), "Report.PDF", "application/pdf");
        assert_eq!(doc.extension().as_deref(), Some("pdf"));
        assert_eq!(Document::new(vec![], ".bashrc", "").extension(), None);
        assert_eq!(Document::new(vec![], "README", "").extension(), None);
    }

    #[test]
    fn combined_markdown_skips_failures_in_order() {
        let result = BatchResult::from_outcomes(vec![
            converted(0, "a.txt", "alpha"),
            failed(1, "b.bin"),
            converted(2, "c.txt", "gamma"),
        ]);
        assert_eq!(result.combined_markdown, "alpha\n\n---\n\ngamma");
        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.failed(), 1);
        assert!(!result.is_exhausted());
    }

    #[test]
    fn empty_batch_is_exhausted() {
        let result = BatchResult::from_outcomes(Vec::new());
        assert!(result.is_exhausted());
        assert!(result.failure_summary().starts_with("No files provided"));
    }

    #[test]
    fn failure_summary_names_each_document() {
        let result = BatchResult::from_outcomes(vec![failed(0, "a.bin"), failed(1, "b.bin")]);
        let summary = result.failure_summary();
        assert!(summary.contains("2 of 2"));
        assert!(summary.contains("a.bin: unreadable"));
        assert!(summary.contains("b.bin: unreadable"));
    }

    #[test]
    fn turn_role_aliases() {
        assert_eq!(TurnRole::parse("user"), Some(TurnRole::Human));
        assert_eq!(TurnRole::parse("ai"), Some(TurnRole::Agent));
        assert_eq!(TurnRole::parse("system"), None);
        assert_eq!(TurnRole::Agent.chat_label(), "assistant");
    }
}
