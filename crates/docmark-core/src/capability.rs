//! External capabilities the cache and the orchestrator call out to.
//!
//! Converting file bytes into markdown and completing prompts are black
//! boxes here. The `docmark` crate provides concrete implementations
//! (a built-in format extractor, an external-command converter, and an
//! OpenAI-compatible chat client); tests substitute counting doubles.

use async_trait::async_trait;

use crate::error::{ConverterError, LlmError};
use crate::models::Document;

/// Turns a document's bytes into markdown.
///
/// Implementations should not fall back to decoding the bytes as text on
/// their own; the cache controller owns the fallback path.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Short identifier used in logs (e.g. `"builtin"`, `"command"`).
    fn name(&self) -> &str;

    /// Converts `doc` to markdown. `doc.model`, when set, selects the vision
    /// model for image inputs.
    async fn convert(&self, doc: &Document) -> Result<String, ConverterError>;
}

/// A text-completion endpoint with optional vision support.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Default text model identifier.
    fn model_name(&self) -> &str;

    /// Model used for images when no per-document model is given.
    fn vision_model_name(&self) -> &str {
        self.model_name()
    }

    /// Completes a single-turn prompt.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Describes an image as markdown using `model`, or the configured
    /// vision model when `None`.
    async fn describe_image(
        &self,
        image: &[u8],
        content_type: &str,
        model: Option<&str>,
    ) -> Result<String, LlmError>;
}
