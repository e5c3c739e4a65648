//! TOML configuration parsing and validation.
//!
//! docmark is configured with a single TOML file (default
//! `./config/docmark.toml`). Secrets never live in the file: the bearer
//! token and LLM API key are read from the environment variables it names.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/docmark.sqlite"
//!
//! [server]
//! bind = "0.0.0.0:8001"
//!
//! [auth]
//! token_env = "API_BEARER_TOKEN"
//!
//! [cache]
//! enabled = true
//! fingerprint = "content_name_type"
//! single_flight = true
//!
//! [conversion]
//! backend = "builtin"
//! timeout_secs = 60
//!
//! [llm]
//! provider = "openai"
//! base_url = "https://openrouter.ai/api/v1"
//! model = "mistralai/mistral-7b-instruct"
//! vision_model = "openai/gpt-4o-mini"
//!
//! [history]
//! limit = 10
//!
//! [batch]
//! concurrency = 1
//! ```

use anyhow::{Context, Result};
use docmark_core::FingerprintScheme;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Upper bound on a request body, base64 payloads included.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    128 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Environment variable holding the expected bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
        }
    }
}

fn default_token_env() -> String {
    "API_BEARER_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Default for requests that do not say whether to use the cache.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub fingerprint: FingerprintScheme,
    /// Coalesce concurrent conversions of the same fingerprint.
    #[serde(default = "default_true")]
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fingerprint: FingerprintScheme::default(),
            single_flight: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversionConfig {
    /// `builtin` or `command`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Program and leading arguments for the `command` backend. The staged
    /// file path is appended as the last argument.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    #[serde(default = "default_conversion_timeout")]
    pub timeout_secs: u64,
    /// Uploads larger than this are rejected before conversion.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            command: default_command(),
            timeout_secs: default_conversion_timeout(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

impl ConversionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_backend() -> String {
    "builtin".to_string()
}
fn default_command() -> Vec<String> {
    vec!["markitdown".to_string()]
}
fn default_conversion_timeout() -> u64 {
    60
}
fn default_max_document_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled` or `openai` (any OpenAI-compatible chat completions API).
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Sent as `HTTP-Referer`; OpenRouter uses it for attribution.
    #[serde(default)]
    pub referer: Option<String>,
    /// Sent as `X-Title`.
    #[serde(default)]
    pub app_title: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_base_url(),
            model: None,
            vision_model: None,
            api_key_env: default_api_key_env(),
            referer: None,
            app_title: None,
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Overall time allowed for one completion, retries included.
    pub fn budget(&self) -> Duration {
        self.timeout()
            .saturating_mul(self.max_retries.saturating_add(1))
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Turns replayed into the agent prompt.
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_history_limit() -> usize {
    10
}
fn default_max_content_chars() -> usize {
    100_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Documents of one batch resolved concurrently. `1` is sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

const MAX_LLM_TIMEOUT_SECS: u64 = 3600;
const MAX_LLM_RETRIES: u32 = 10;

pub fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    if config.auth.token_env.trim().is_empty() {
        anyhow::bail!("auth.token_env must not be empty");
    }

    match config.conversion.backend.as_str() {
        "builtin" => {}
        "command" => {
            if config.conversion.command.is_empty() {
                anyhow::bail!("conversion.command must name a program when backend is 'command'");
            }
        }
        other => anyhow::bail!(
            "Unknown conversion backend: '{}'. Must be builtin or command.",
            other
        ),
    }
    if config.conversion.timeout_secs == 0 {
        anyhow::bail!("conversion.timeout_secs must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.llm.model.is_none() {
                anyhow::bail!("llm.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }
    if config.llm.timeout_secs > MAX_LLM_TIMEOUT_SECS {
        anyhow::bail!("llm.timeout_secs must be <= {}", MAX_LLM_TIMEOUT_SECS);
    }
    if config.llm.max_retries > MAX_LLM_RETRIES {
        anyhow::bail!("llm.max_retries must be <= {}", MAX_LLM_RETRIES);
    }

    if config.history.limit == 0 {
        anyhow::bail!("history.limit must be >= 1");
    }
    if config.batch.concurrency == 0 {
        anyhow::bail!("batch.concurrency must be >= 1");
    }

    Ok(())
}
