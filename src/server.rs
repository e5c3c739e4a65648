//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version, no auth) |
//! | `POST` | `/api/convert-to-markdown` | Convert one file to markdown |
//! | `POST` | `/api/file-agent` | Render files as numbered context, no language model |
//! | `POST` | `/api/file-agent-cached` | Answer a question about files through the cache |
//!
//! Every `/api/*` route requires `Authorization: Bearer <token>`. The check
//! runs in middleware before any handler, so a rejected request never
//! reaches the store or the converter.
//!
//! # Error Contract
//!
//! Transport-level failures (auth, malformed JSON) use a non-2xx status and
//! the body:
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "invalid bearer token" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401),
//! `server_misconfigured` (500).
//!
//! Processing failures (a file that would not convert, an LLM error) are
//! returned with status 200 and `"success": false`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use docmark_core::error::ConversionError;
use docmark_core::models::DocumentOutcome;
use docmark_core::Document;

use crate::auth::AuthError;
use crate::batch::{AgentError, AgentQuery, BatchItem};
use crate::config::Config;
use crate::context::AppContext;

/// Starts the HTTP server on `[server].bind`.
///
/// Opens the database, builds the configured converter and language model,
/// and serves until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = AppContext::from_config(config).await?;
    run_server_with_context(ctx).await
}

/// Like [`run_server`], but with a pre-built [`AppContext`].
pub async fn run_server_with_context(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    if !ctx.auth.is_configured() {
        warn!(
            "{} is not set; every /api request will be rejected",
            ctx.config.auth.token_env
        );
    }

    let app = build_router(ctx);

    println!("docmark server listening on http://{}", bind_addr);
    info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Builds the router with auth, CORS, and body limits applied.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/api/convert-to-markdown", post(handle_convert))
        .route("/api/file-agent", post(handle_file_agent))
        .route("/api/file-agent-cached", post(handle_file_agent_cached))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), require_bearer));

    Router::new()
        .route("/health", get(handle_health))
        .merge(api)
        .layer(DefaultBodyLimit::max(ctx.config.server.max_body_bytes))
        .layer(cors)
        .with_state(ctx)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let (status, code) = match err {
            AuthError::MissingSecret { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_misconfigured")
            }
            AuthError::MissingCredential | AuthError::InvalidCredential => {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

async fn require_bearer(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = ctx.auth.verify(header) {
        warn!(path = %request.uri().path(), "rejected request: {}", e);
        return Err(e.into());
    }
    Ok(next.run(request).await)
}

// ============ Request payloads ============

/// A file as submitted by clients.
#[derive(Debug, Deserialize)]
struct FilePayload {
    name: String,
    #[serde(rename = "type", default)]
    content_type: String,
    base64: String,
    /// Vision model to use for image files.
    #[serde(default)]
    model: Option<String>,
}

/// Decodes a payload into a batch item. Bad base64 and oversized files
/// become rejected items rather than request errors.
fn decode_payload(file: FilePayload, max_bytes: usize) -> BatchItem {
    let decoded = base64::engine::general_purpose::STANDARD.decode(file.base64.trim());
    let error = match decoded {
        Ok(bytes) if bytes.len() <= max_bytes => {
            let mut doc = Document::new(bytes, file.name, file.content_type);
            doc.model = file.model;
            return BatchItem::Ready(doc);
        }
        Ok(bytes) => ConversionError::InvalidPayload(format!(
            "file is {} bytes, limit is {}",
            bytes.len(),
            max_bytes
        )),
        Err(e) => ConversionError::InvalidPayload(format!("invalid base64: {}", e)),
    };
    BatchItem::Rejected {
        name: file.name,
        error,
    }
}

fn decode_all(files: Vec<FilePayload>, max_bytes: usize) -> Vec<BatchItem> {
    files
        .into_iter()
        .map(|f| decode_payload(f, max_bytes))
        .collect()
}

#[derive(Serialize)]
struct MarkdownResponse {
    success: bool,
    markdown: String,
    error: Option<String>,
}

impl MarkdownResponse {
    fn ok(markdown: String) -> Self {
        Self {
            success: true,
            markdown,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            markdown: String::new(),
            error: Some(error),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/convert-to-markdown ============

#[derive(Deserialize)]
struct ConvertRequest {
    file: FilePayload,
    #[serde(default)]
    use_cache: Option<bool>,
}

async fn handle_convert(
    State(ctx): State<AppContext>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Json<MarkdownResponse>, AppError> {
    let Json(req) = payload?;
    let use_cache = req.use_cache.unwrap_or(ctx.config.cache.enabled);
    let name = req.file.name.clone();
    info!(name = %name, use_cache, "convert request");

    let result = match decode_payload(req.file, ctx.config.conversion.max_document_bytes) {
        BatchItem::Ready(doc) => ctx.cache().resolve(&doc, use_cache).await,
        BatchItem::Rejected { error, .. } => Err(error),
    };

    Ok(Json(match result {
        Ok(resolution) => MarkdownResponse::ok(resolution.markdown),
        Err(e) => MarkdownResponse::failed(format!("Failed to process file {}: {}", name, e)),
    }))
}

// ============ POST /api/file-agent ============

#[derive(Deserialize)]
struct FileAgentRequest {
    query: String,
    session_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    files: Vec<FilePayload>,
}

async fn handle_file_agent(
    State(ctx): State<AppContext>,
    payload: Result<Json<FileAgentRequest>, JsonRejection>,
) -> Result<Json<MarkdownResponse>, AppError> {
    let Json(req) = payload?;
    if req.session_id.trim().is_empty() {
        return Err(bad_request("session_id must not be empty"));
    }

    let query = AgentQuery {
        query: req.query,
        session_id: req.session_id,
        user_id: req.user_id,
        request_id: req.request_id.unwrap_or_else(new_request_id),
        items: decode_all(req.files, ctx.config.conversion.max_document_bytes),
        use_cache: ctx.config.cache.enabled,
    };
    info!(session = %query.session_id, request = %query.request_id, files = query.items.len(), "file-agent request");

    let reply = ctx.orchestrator.context(query).await;
    Ok(Json(MarkdownResponse::ok(reply.markdown)))
}

// ============ POST /api/file-agent-cached ============

#[derive(Deserialize)]
struct CachedAgentRequest {
    query: String,
    session_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    files: Vec<FilePayload>,
    #[serde(default)]
    use_cache: Option<bool>,
}

#[derive(Serialize)]
struct AgentResponse {
    success: bool,
    markdown: String,
    error: Option<String>,
    documents: Vec<DocumentOutcome>,
}

async fn handle_file_agent_cached(
    State(ctx): State<AppContext>,
    payload: Result<Json<CachedAgentRequest>, JsonRejection>,
) -> Result<Json<AgentResponse>, AppError> {
    let Json(req) = payload?;
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.session_id.trim().is_empty() {
        return Err(bad_request("session_id must not be empty"));
    }

    let query = AgentQuery {
        query: req.query,
        session_id: req.session_id,
        user_id: req.user_id,
        request_id: req.request_id.unwrap_or_else(new_request_id),
        items: decode_all(req.files, ctx.config.conversion.max_document_bytes),
        use_cache: req.use_cache.unwrap_or(ctx.config.cache.enabled),
    };
    info!(session = %query.session_id, request = %query.request_id, files = query.items.len(), "file-agent-cached request");

    let response = match ctx.orchestrator.answer(query).await {
        Ok(answer) => AgentResponse {
            success: true,
            markdown: answer.answer,
            error: None,
            documents: answer.batch.outcomes,
        },
        Err(err) => AgentResponse {
            success: false,
            markdown: String::new(),
            error: Some(err.to_string()),
            documents: match err {
                AgentError::BatchExhausted { batch, .. } | AgentError::Llm { batch, .. } => {
                    batch.outcomes
                }
            },
        },
    };
    Ok(Json(response))
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(base64: &str) -> FilePayload {
        FilePayload {
            name: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
            base64: base64.to_string(),
            model: Some("vlm".to_string()),
        }
    }

    #[test]
    fn decodes_valid_payload() {
        match decode_payload(payload("aGVsbG8="), 1024) {
            BatchItem::Ready(doc) => {
                assert_eq!(doc.content, b"hello");
                assert_eq!(doc.model.as_deref(), Some("vlm"));
            }
            other => panic!("expected ready item, got {:?}", other),
        }
    }

    #[test]
    fn bad_base64_is_a_rejected_item() {
        match decode_payload(payload("%%%"), 1024) {
            BatchItem::Rejected { name, error } => {
                assert_eq!(name, "a.txt");
                assert!(error.to_string().contains("invalid base64"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn oversized_payload_is_rejected() {
        assert!(matches!(
            decode_payload(payload("aGVsbG8="), 3),
            BatchItem::Rejected { .. }
        ));
    }

    #[test]
    fn auth_errors_map_to_status() {
        let e: AppError = AuthError::InvalidCredential.into();
        assert_eq!(e.status, StatusCode::UNAUTHORIZED);
        let e: AppError = AuthError::MissingSecret {
            env: "X".to_string(),
        }
        .into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code, "server_misconfigured");
    }
}
