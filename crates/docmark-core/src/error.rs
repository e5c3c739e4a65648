//! Error types shared across docmark.
//!
//! Storage and conversion failures are kept apart because callers treat them
//! differently: a [`StoreError`] degrades a request (cache miss, skipped
//! write) while a [`ConversionError`] fails one document of a batch.

use thiserror::Error;

/// Failure of the durable storage collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn unavailable(detail: impl ToString) -> Self {
        StoreError::Unavailable(detail.to_string())
    }
}

/// Failure reported by a [`Converter`](crate::capability::Converter).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConverterError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("{format} extraction failed: {detail}")]
    Extraction { format: &'static str, detail: String },

    #[error("converter produced no markdown")]
    EmptyOutput,

    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("vision model '{model}' is not authorized for this API key")]
    VisionUnauthorized { model: String },

    #[error("vision model error: {0}")]
    Vision(String),

    #[error("external converter failed: {0}")]
    External(String),
}

/// Failure of a [`LanguageModel`](crate::capability::LanguageModel) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("language model is disabled")]
    Disabled,

    #[error("language model request unauthorized: {0}")]
    Unauthorized(String),

    #[error("language model API error: {0}")]
    Api(String),

    #[error("language model returned an empty response")]
    EmptyResponse,

    #[error("language model call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// A document could not be turned into markdown by any path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    /// The submitted payload could not be decoded into bytes.
    #[error("invalid document payload: {0}")]
    InvalidPayload(String),

    /// Converter and plain-text fallback both failed.
    #[error("{converter}; plain-text fallback failed: {fallback}")]
    Failed {
        converter: ConverterError,
        fallback: String,
    },
}
