//! HTTP round-trip tests against a live server on a free port.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use docmark::auth::BearerAuth;
use docmark::config::Config;
use docmark::context::{AppContext, Parts};
use docmark::server::run_server_with_context;
use docmark_core::capability::{Converter, LanguageModel};
use docmark_core::error::{ConverterError, LlmError, StoreError};
use docmark_core::models::{CacheRecord, CacheStats};
use docmark_core::store::memory::InMemoryStore;
use docmark_core::store::ConversionStore;
use docmark_core::{Document, Fingerprint};

const TOKEN: &str = "test-token";

// ─── Test doubles ───────────────────────────────────────────────────

/// Counts every store call before delegating to memory.
#[derive(Default)]
struct CountingStore {
    inner: InMemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversionStore for CountingStore {
    async fn fetch(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>, StoreError> {
        self.hit();
        self.inner.fetch(fingerprint).await
    }

    async fn touch(&self, fingerprint: &Fingerprint, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.hit();
        self.inner.touch(fingerprint, at).await
    }

    async fn upsert(
        &self,
        fingerprint: &Fingerprint,
        file_name: &str,
        file_type: &str,
        markdown: &str,
    ) -> Result<CacheRecord, StoreError> {
        self.hit();
        self.inner.upsert(fingerprint, file_name, file_type, markdown).await
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        self.hit();
        self.inner.stats().await
    }
}

struct ShoutConverter {
    calls: AtomicUsize,
}

#[async_trait]
impl Converter for ShoutConverter {
    fn name(&self) -> &str {
        "shout"
    }

    async fn convert(&self, doc: &Document) -> Result<String, ConverterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if doc.content_type == "application/x-broken" {
            return Err(ConverterError::EmptyOutput);
        }
        Ok(String::from_utf8_lossy(&doc.content).to_uppercase())
    }
}

struct EchoModel;

#[async_trait]
impl LanguageModel for EchoModel {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let question = prompt
            .rsplit("User Question: ")
            .next()
            .unwrap_or_default()
            .trim_end_matches("\n\nAnswer:");
        Ok(format!("You asked: {}", question))
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

// ─── Helpers ────────────────────────────────────────────────────────

struct TestServer {
    port: u16,
    store: Arc<CountingStore>,
    converter: Arc<ShoutConverter>,
    handle: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn test_config_with_port(tmp: &TempDir, port: u16) -> Config {
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:{}"
"#,
        tmp.path().join("docmark.sqlite").display(),
        port
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start_server(secret: Option<&str>) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config_with_port(&tmp, port);

    let store = Arc::new(CountingStore::default());
    let converter = Arc::new(ShoutConverter {
        calls: AtomicUsize::new(0),
    });
    let ctx = AppContext::from_parts(
        cfg,
        Parts {
            store: store.clone(),
            history: Arc::new(InMemoryStore::new()),
            converter: converter.clone(),
            llm: Arc::new(EchoModel),
            auth: BearerAuth::with_secret(secret.map(str::to_string)),
        },
    );

    let handle = tokio::spawn(async move {
        run_server_with_context(ctx).await.ok();
    });
    wait_for_server(port).await;

    TestServer {
        port,
        store,
        converter,
        handle,
        _tmp: tmp,
    }
}

fn file(name: &str, content_type: &str, body: &[u8]) -> Value {
    json!({
        "name": name,
        "type": content_type,
        "base64": base64::engine::general_purpose::STANDARD.encode(body),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_token() {
    let server = start_server(Some(TOKEN)).await;
    let body: Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn rejected_requests_never_touch_the_store() {
    let server = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();
    let body = json!({ "file": file("a.txt", "text/plain", b"hello") });

    let resp = client
        .post(server.url("/api/convert-to-markdown"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "unauthorized");

    let resp = client
        .post(server.url("/api/file-agent-cached"))
        .bearer_auth("wrong-token")
        .json(&json!({ "query": "q", "session_id": "s", "files": [file("a.txt", "text/plain", b"x")] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    assert_eq!(server.store.calls(), 0);
    assert_eq!(server.converter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_server_secret_is_a_server_error() {
    let server = start_server(None).await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/convert-to-markdown"))
        .bearer_auth(TOKEN)
        .json(&json!({ "file": file("a.txt", "text/plain", b"hello") }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "server_misconfigured");
    assert_eq!(server.store.calls(), 0);
}

#[tokio::test]
async fn convert_uses_the_cache() {
    let server = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();
    let body = json!({ "file": file("a.txt", "text/plain", b"hello") });

    for _ in 0..2 {
        let resp: Value = client
            .post(server.url("/api/convert-to-markdown"))
            .bearer_auth(TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["success"], true);
        assert_eq!(resp["markdown"], "HELLO");
    }
    assert_eq!(server.converter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn convert_reports_unconvertible_files() {
    let server = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();

    let resp: Value = client
        .post(server.url("/api/convert-to-markdown"))
        .bearer_auth(TOKEN)
        .json(&json!({ "file": file("x.bin", "application/x-broken", &[0xff, 0x00, 0xfe]) }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["success"], false);
    assert!(resp["error"].as_str().unwrap().starts_with("Failed to process file x.bin"));

    let resp: Value = client
        .post(server.url("/api/convert-to-markdown"))
        .bearer_auth(TOKEN)
        .json(&json!({ "file": { "name": "y.txt", "type": "text/plain", "base64": "!!" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["success"], false);
    assert!(resp["error"].as_str().unwrap().contains("invalid base64"));
}

#[tokio::test]
async fn cached_agent_answers_and_lists_documents() {
    let server = start_server(Some(TOKEN)).await;
    let client = reqwest::Client::new();

    let resp: Value = client
        .post(server.url("/api/file-agent-cached"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "query": "what is in here?",
            "session_id": "s1",
            "user_id": "u1",
            "files": [
                file("a.txt", "text/plain", b"alpha"),
                file("x.bin", "application/x-broken", &[0xff, 0x00]),
            ],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp["success"], true);
    assert_eq!(resp["markdown"], "You asked: what is in here?");
    let docs = resp["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["name"], "a.txt");
    assert_eq!(docs[0]["status"], "converted");
    assert_eq!(docs[1]["status"], "failed");
}

#[tokio::test]
async fn cached_agent_without_files_fails_softly() {
    let server = start_server(Some(TOKEN)).await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/file-agent-cached"))
        .bearer_auth(TOKEN)
        .json(&json!({ "query": "anything", "session_id": "s1", "files": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().starts_with("No files provided"));
}

#[tokio::test]
async fn file_agent_returns_numbered_context() {
    let server = start_server(Some(TOKEN)).await;
    let resp: Value = reqwest::Client::new()
        .post(server.url("/api/file-agent"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "query": "context please",
            "session_id": "s2",
            "user_id": "u1",
            "request_id": "r1",
            "files": [file("a.txt", "text/plain", b"alpha")],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp["success"], true);
    assert_eq!(
        resp["markdown"],
        "File content to use as context:\n\n1. a.txt:\n\nALPHA\n\n"
    );
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let server = start_server(Some(TOKEN)).await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/file-agent-cached"))
        .bearer_auth(TOKEN)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
}
