//! Wiring of the long-lived service components.
//!
//! Every capability (store, converter, language model) is built once from
//! [`Config`] and shared behind `Arc`. Tests build an [`AppContext`] from
//! their own parts with [`AppContext::from_parts`].

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use docmark_core::capability::{Converter, LanguageModel};
use docmark_core::store::{ConversionStore, HistoryStore};

use crate::auth::BearerAuth;
use crate::batch::BatchOrchestrator;
use crate::cache::ConversionCache;
use crate::config::Config;
use crate::convert::create_converter;
use crate::history::HistoryRecorder;
use crate::llm::create_language_model;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Shared state for the HTTP server and CLI commands.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversionStore>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub auth: BearerAuth,
}

/// Capabilities an [`AppContext`] is assembled from.
pub struct Parts {
    pub store: Arc<dyn ConversionStore>,
    pub history: Arc<dyn HistoryStore>,
    pub converter: Arc<dyn Converter>,
    pub llm: Arc<dyn LanguageModel>,
    pub auth: BearerAuth,
}

impl AppContext {
    /// Opens the database (applying the schema), and builds the configured
    /// converter and language model.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        let sqlite = Arc::new(SqliteStore::new(pool));

        let llm = create_language_model(&config.llm)?;
        let converter = create_converter(&config.conversion, llm.clone())?;
        info!(
            converter = converter.name(),
            llm = llm.model_name(),
            db = %config.db.path.display(),
            "service components ready"
        );

        Ok(Self::from_parts(
            config.clone(),
            Parts {
                store: sqlite.clone(),
                history: sqlite,
                converter,
                llm,
                auth: BearerAuth::from_env(&config.auth),
            },
        ))
    }

    pub fn from_parts(config: Config, parts: Parts) -> Self {
        let cache = ConversionCache::new(
            parts.store.clone(),
            parts.converter,
            config.cache.fingerprint,
            config.conversion.timeout(),
        )
        .with_single_flight(config.cache.single_flight);
        let history = HistoryRecorder::new(parts.history, &config.history);
        let llm_budget = config.llm.budget();
        let orchestrator = BatchOrchestrator::new(
            cache,
            parts.llm,
            history,
            config.batch.concurrency,
            llm_budget,
        );

        Self {
            config: Arc::new(config),
            store: parts.store,
            orchestrator: Arc::new(orchestrator),
            auth: parts.auth,
        }
    }

    pub fn cache(&self) -> &ConversionCache {
        self.orchestrator.cache()
    }
}
