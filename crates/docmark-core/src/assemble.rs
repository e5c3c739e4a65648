//! Text assembly for batch results and agent prompts.

use crate::models::{ConversationTurn, DocumentOutcome, OutcomeStatus, ResolutionSource};

/// Delimiter placed between documents in combined markdown.
pub const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";

/// Joins markdown fragments in iteration order with [`DOCUMENT_SEPARATOR`].
pub fn join_markdown<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts.into_iter().collect::<Vec<_>>().join(DOCUMENT_SEPARATOR)
}

/// Renders history as one `role: content` line per turn, oldest first.
pub fn format_history(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.chat_label(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the single prompt sent to the language model in agent mode.
pub fn build_agent_prompt(
    combined_markdown: &str,
    history: &[ConversationTurn],
    query: &str,
) -> String {
    format!(
        "Context:\n{}\n\nConversation History:\n{}\n\nUser Question: {}\n\nAnswer:",
        combined_markdown,
        format_history(history),
        query
    )
}

/// Renders a numbered listing of every outcome for context mode.
///
/// ```text
/// File content to use as context:
///
/// 1. report.pdf:
///
/// <markdown>
///
/// 2. notes.bin (failed to process)
/// ```
pub fn render_file_context(outcomes: &[DocumentOutcome]) -> String {
    if outcomes.is_empty() {
        return String::new();
    }
    let mut out = String::from("File content to use as context:\n\n");
    for outcome in outcomes {
        let n = outcome.index + 1;
        match &outcome.status {
            OutcomeStatus::Converted { markdown, source } => {
                let label = match source {
                    ResolutionSource::PlainText => " (plain text)",
                    ResolutionSource::Cache | ResolutionSource::Converted => "",
                };
                out.push_str(&format!("{}. {}{}:\n\n{}\n\n", n, outcome.name, label, markdown));
            }
            OutcomeStatus::Failed { .. } => {
                out.push_str(&format!("{}. {} (failed to process)\n\n", n, outcome.name));
            }
        }
    }
    out
}

/// Truncates `content` to at most `max_chars` characters, marking the cut.
pub fn truncate_content(content: &str, max_chars: usize) -> (String, bool) {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (format!("{}\n...(truncated)", &content[..byte_idx]), true),
        None => (content.to_string(), false),
    }
}
