//! Language model clients.
//!
//! - **[`DisabledModel`]**: returns [`LlmError::Disabled`]; used when
//!   `llm.provider = "disabled"`.
//! - **[`OpenAiCompatibleClient`]**: calls `POST {base_url}/chat/completions`
//!   on any OpenAI-compatible API (OpenRouter by default).
//!
//! # Retry Strategy
//!
//! - HTTP 401/403 → [`LlmError::Unauthorized`], no retry
//! - HTTP 429 and 5xx → retry with exponential backoff
//! - other 4xx → [`LlmError::Api`], no retry
//! - network errors and timeouts → retry
//! - backoff: 500ms, 1s, 2s, 4s, … (capped at 2^5 × 500ms)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::{debug, warn};

use docmark_core::capability::LanguageModel;
use docmark_core::error::LlmError;

use crate::config::LlmConfig;

const BACKOFF_BASE_MS: u64 = 500;

/// Instruction sent alongside an image for vision conversion.
pub const VISION_PROMPT: &str = "Convert this image to markdown. Transcribe all visible text \
verbatim, render tables as markdown tables, and briefly describe any charts, diagrams, or \
photographs. Respond with markdown only.";

/// A language model that refuses every call.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }

    async fn describe_image(
        &self,
        _image: &[u8],
        _content_type: &str,
        _model: Option<&str>,
    ) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    vision_model: Option<String>,
    referer: Option<String>,
    app_title: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiCompatibleClient {
    /// Builds a client from configuration, reading the API key from the
    /// environment variable named by `llm.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if `llm.model` is unset or the API key variable is
    /// missing.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for openai provider"))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model,
            vision_model: config.vision_model.clone(),
            referer: config.referer.clone(),
            app_title: config.app_title.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    async fn chat(&self, body: Value) -> Result<String, LlmError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = BACKOFF_BASE_MS << (attempt - 1).min(5);
                warn!("LLM retry {}/{} after {}ms", attempt, self.max_retries, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let mut request = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body);
            if let Some(referer) = &self.referer {
                request = request.header("HTTP-Referer", referer);
            }
            if let Some(title) = &self.app_title {
                request = request.header("X-Title", title);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response
                            .json()
                            .await
                            .map_err(|e| LlmError::Api(format!("invalid response body: {}", e)))?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(LlmError::Unauthorized(format!("{}: {}", status, body_text)));
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(LlmError::Api(format!("{}: {}", status, body_text)));
                        continue;
                    }
                    return Err(LlmError::Api(format!("{}: {}", status, body_text)));
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(LlmError::Timeout {
                        secs: self.timeout_secs,
                    });
                }
                Err(e) => {
                    last_err = Some(LlmError::Api(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Api("request failed after retries".to_string())))
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn vision_model_name(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(&self.model)
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "LLM completion");
        self.chat(completion_body(&self.model, prompt)).await
    }

    async fn describe_image(
        &self,
        image: &[u8],
        content_type: &str,
        model: Option<&str>,
    ) -> Result<String, LlmError> {
        let model = model.unwrap_or(self.vision_model_name());
        debug!(model = %model, bytes = image.len(), "LLM vision request");
        self.chat(vision_body(model, image, content_type)).await
    }
}

fn completion_body(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
    })
}

fn vision_body(model: &str, image: &[u8], content_type: &str) -> Value {
    let data_url = format!(
        "data:{};base64,{}",
        content_type,
        base64::engine::general_purpose::STANDARD.encode(image)
    );
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": VISION_PROMPT },
                { "type": "image_url", "image_url": { "url": data_url } },
            ],
        }],
    })
}

/// Extracts `choices[0].message.content` from a chat completion response.
fn parse_chat_response(json: &Value) -> Result<String, LlmError> {
    if let Some(err) = json.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(LlmError::Api(message.to_string()));
    }
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(content.to_string())
}

/// Creates the configured [`LanguageModel`].
///
/// | Config Value | Model |
/// |--------------|-------|
/// | `"disabled"` | [`DisabledModel`] |
/// | `"openai"` | [`OpenAiCompatibleClient`] |
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAiCompatibleClient::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
