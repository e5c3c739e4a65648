//! # docmark core
//!
//! Shared, runtime-agnostic logic for docmark: document and cache models,
//! the fingerprint function, the conversion-cache and conversation-history
//! store abstractions, and the capability traits for converters and
//! language models.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP client
//! dependencies. The `docmark` crate supplies the concrete backends and the
//! orchestration that drives them.

pub mod assemble;
pub mod capability;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod store;

pub use fingerprint::{Fingerprint, FingerprintScheme};
pub use models::{CacheRecord, ConversationTurn, Document, TurnRole};
