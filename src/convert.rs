//! Converter implementations.
//!
//! | Backend | Type | Handles |
//! |---------|------|---------|
//! | `builtin` | [`BuiltinConverter`] | Office, PDF, HTML, CSV, JSON, text via [`crate::extract`] |
//! | `command` | [`CommandConverter`] | Anything an external CLI (default `markitdown`) accepts |
//!
//! Both send `image/*` documents to the vision model of the configured
//! [`LanguageModel`], honouring the document's model hint.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::debug;

use docmark_core::capability::{Converter, LanguageModel};
use docmark_core::error::{ConverterError, LlmError};
use docmark_core::Document;

use crate::config::ConversionConfig;
use crate::extract::{self, extract_markdown};

/// Declared type without parameters, lowercased. Falls back to the file
/// extension when the declared type is empty or `application/octet-stream`.
pub fn effective_content_type(doc: &Document) -> String {
    let declared = doc
        .content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !declared.is_empty() && declared != "application/octet-stream" {
        return declared;
    }
    doc.extension()
        .and_then(|ext| content_type_for_extension(&ext))
        .map(str::to_string)
        .unwrap_or(declared)
}

/// Media type for a lowercase file extension.
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    let ct = match ext {
        "pdf" => extract::MIME_PDF,
        "docx" => extract::MIME_DOCX,
        "pptx" => extract::MIME_PPTX,
        "xlsx" => extract::MIME_XLSX,
        "html" | "htm" => extract::MIME_HTML,
        "csv" => extract::MIME_CSV,
        "json" => extract::MIME_JSON,
        "md" | "markdown" => extract::MIME_MARKDOWN,
        "txt" | "text" | "log" => extract::MIME_TEXT,
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(ct)
}

async fn describe_image(
    llm: &dyn LanguageModel,
    doc: &Document,
    content_type: &str,
) -> Result<String, ConverterError> {
    let model = doc.model.as_deref();
    llm.describe_image(&doc.content, content_type, model)
        .await
        .map_err(|e| match e {
            LlmError::Unauthorized(_) => ConverterError::VisionUnauthorized {
                model: model.unwrap_or(llm.vision_model_name()).to_string(),
            },
            other => ConverterError::Vision(other.to_string()),
        })
}

fn non_empty(markdown: String) -> Result<String, ConverterError> {
    if markdown.trim().is_empty() {
        Err(ConverterError::EmptyOutput)
    } else {
        Ok(markdown)
    }
}

/// In-process converter built on the format extractors.
pub struct BuiltinConverter {
    llm: Arc<dyn LanguageModel>,
}

impl BuiltinConverter {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Converter for BuiltinConverter {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn convert(&self, doc: &Document) -> Result<String, ConverterError> {
        let content_type = effective_content_type(doc);
        if content_type.starts_with("image/") {
            return non_empty(describe_image(self.llm.as_ref(), doc, &content_type).await?);
        }

        debug!(name = %doc.name, content_type = %content_type, "builtin extraction");
        let bytes = doc.content.clone();
        let markdown = tokio::task::spawn_blocking(move || extract_markdown(&bytes, &content_type))
            .await
            .map_err(|e| ConverterError::External(format!("extraction task failed: {}", e)))??;
        non_empty(markdown)
    }
}

/// Runs an external conversion tool on a staged copy of the document.
///
/// The bytes are written to a temporary file carrying the original
/// extension (tools sniff formats by suffix) and the file path is appended
/// to the configured command. The temporary file is deleted when the call
/// returns, whether the tool succeeded, failed, or the future was dropped
/// by a timeout; the child process is killed in the last case.
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
    llm: Arc<dyn LanguageModel>,
}

impl CommandConverter {
    pub fn new(command: &[String], llm: Arc<dyn LanguageModel>) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("conversion.command must not be empty");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            llm,
        })
    }

    async fn stage(&self, doc: &Document) -> std::io::Result<tempfile::NamedTempFile> {
        let suffix = doc.extension().map(|e| format!(".{}", e)).unwrap_or_default();
        let content = doc.content.clone();
        tokio::task::spawn_blocking(move || {
            let mut staged = tempfile::Builder::new()
                .prefix("docmark-")
                .suffix(&suffix)
                .tempfile()?;
            staged.write_all(&content)?;
            staged.flush()?;
            Ok::<_, std::io::Error>(staged)
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

#[async_trait]
impl Converter for CommandConverter {
    fn name(&self) -> &str {
        "command"
    }

    async fn convert(&self, doc: &Document) -> Result<String, ConverterError> {
        let content_type = effective_content_type(doc);
        if content_type.starts_with("image/") {
            return non_empty(describe_image(self.llm.as_ref(), doc, &content_type).await?);
        }

        let staged = self
            .stage(doc)
            .await
            .map_err(|e| ConverterError::External(format!("failed to stage document: {}", e)))?;
        debug!(program = %self.program, path = %staged.path().display(), "running external converter");

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(staged.path())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConverterError::External(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail: String = stderr.trim().chars().take(500).collect();
            return Err(ConverterError::External(format!(
                "{} exited with {}: {}",
                self.program, output.status, detail
            )));
        }

        non_empty(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Creates the configured [`Converter`].
pub fn create_converter(
    config: &ConversionConfig,
    llm: Arc<dyn LanguageModel>,
) -> Result<Arc<dyn Converter>> {
    match config.backend.as_str() {
        "builtin" => Ok(Arc::new(BuiltinConverter::new(llm))),
        "command" => Ok(Arc::new(CommandConverter::new(&config.command, llm)?)),
        other => bail!("Unknown conversion backend: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DisabledModel;

    struct EchoVision;

    #[async_trait]
    impl LanguageModel for EchoVision {
        fn model_name(&self) -> &str {
            "text-model"
        }

        fn vision_model_name(&self) -> &str {
            "vision-model"
        }

        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            Ok(prompt.to_string())
        }

        async fn describe_image(
            &self,
            image: &[u8],
            content_type: &str,
            model: Option<&str>,
        ) -> Result<String, LlmError> {
            let model = model.unwrap_or(self.vision_model_name());
            if model == "forbidden" || content_type == "image/gif" {
                return Err(LlmError::Unauthorized("401".to_string()));
            }
            Ok(format!(
                "{} bytes of {} via {}",
                image.len(),
                content_type,
                model
            ))
        }
    }

    #[test]
    fn content_type_strips_parameters_and_guesses() {
        let doc = Document::new(vec![], "a.txt", "Text/Plain; charset=utf-8");
        assert_eq!(effective_content_type(&doc), "text/plain");
        let doc = Document::new(vec![], "deck.PPTX", "application/octet-stream");
        assert_eq!(effective_content_type(&doc), extract::MIME_PPTX);
        let doc = Document::new(vec![], "blob", "");
        assert_eq!(effective_content_type(&doc), "");
    }

    #[tokio::test]
    async fn builtin_converts_text() {
        let converter = BuiltinConverter::new(Arc::new(DisabledModel));
        let doc = Document::new(b"# Hi".to_vec(), "a.md", "text/markdown");
        assert_eq!(converter.convert(&doc).await.unwrap(), "# Hi");
    }

    #[tokio::test]
    async fn builtin_rejects_empty_output() {
        let converter = BuiltinConverter::new(Arc::new(DisabledModel));
        let doc = Document::new(b"   ".to_vec(), "a.txt", "text/plain");
        assert_eq!(converter.convert(&doc).await, Err(ConverterError::EmptyOutput));
    }

    #[tokio::test]
    async fn images_use_model_hint() {
        let converter = BuiltinConverter::new(Arc::new(EchoVision));
        let doc = Document::new(vec![1, 2, 3], "p.png", "image/png").with_model("vlm-x");
        assert_eq!(
            converter.convert(&doc).await.unwrap(),
            "3 bytes of image/png via vlm-x"
        );
    }

    #[tokio::test]
    async fn unauthorized_vision_model_is_named() {
        let converter = BuiltinConverter::new(Arc::new(EchoVision));
        let doc = Document::new(vec![1], "p.png", "image/png").with_model("forbidden");
        assert_eq!(
            converter.convert(&doc).await,
            Err(ConverterError::VisionUnauthorized {
                model: "forbidden".to_string()
            })
        );
    }

    #[tokio::test]
    async fn unauthorized_default_vision_model_is_named() {
        let converter = BuiltinConverter::new(Arc::new(EchoVision));
        let doc = Document::new(vec![1], "anim.gif", "image/gif");
        assert_eq!(
            converter.convert(&doc).await,
            Err(ConverterError::VisionUnauthorized {
                model: "vision-model".to_string()
            })
        );
    }

    #[tokio::test]
    async fn images_fail_when_llm_disabled() {
        let converter = BuiltinConverter::new(Arc::new(DisabledModel));
        let doc = Document::new(vec![1], "p.jpg", "");
        assert!(matches!(
            converter.convert(&doc).await,
            Err(ConverterError::Vision(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_converter_reads_stdout_and_removes_staged_file() {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat \"$0\"; echo; echo \"$0\"".to_string(),
        ];
        let converter = CommandConverter::new(&command, Arc::new(DisabledModel)).unwrap();
        let doc = Document::new(b"staged body".to_vec(), "notes.txt", "text/plain");

        let out = converter.convert(&doc).await.unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("staged body"));
        let staged_path = lines.next().unwrap();
        assert!(staged_path.ends_with(".txt"));
        assert!(!std::path::Path::new(staged_path).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_converter_reports_failures_and_removes_staged_file() {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo \"$0\" >&2; exit 3".to_string(),
        ];
        let converter = CommandConverter::new(&command, Arc::new(DisabledModel)).unwrap();
        let doc = Document::new(b"x".to_vec(), "x.bin", "application/x-thing");
        let msg = match converter.convert(&doc).await {
            Err(ConverterError::External(msg)) => msg,
            other => panic!("expected external failure, got {:?}", other),
        };
        let staged_path = msg.rsplit(": ").next().unwrap();
        assert!(staged_path.ends_with(".bin"), "unexpected message: {}", msg);
        assert!(!std::path::Path::new(staged_path).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_converter_timeout_kills_tool_and_removes_staged_file() {
        use crate::cache::ConversionCache;
        use docmark_core::models::ResolutionSource;
        use docmark_core::store::memory::InMemoryStore;
        use docmark_core::FingerprintScheme;

        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("staged-path");
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo \"$0\" > '{}'; sleep 5", marker.display()),
        ];
        let converter = CommandConverter::new(&command, Arc::new(DisabledModel)).unwrap();
        let cache = ConversionCache::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(converter),
            FingerprintScheme::default(),
            std::time::Duration::from_secs(1),
        );
        let doc = Document::new(b"late body".to_vec(), "late.txt", "text/plain");

        let started = std::time::Instant::now();
        let resolved = cache.resolve(&doc, false).await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert_eq!(resolved.source, ResolutionSource::PlainText);
        assert_eq!(resolved.markdown, "late body");

        let staged = std::fs::read_to_string(&marker).unwrap();
        let staged_path = staged.trim();
        assert!(staged_path.ends_with(".txt"));
        assert!(!std::path::Path::new(staged_path).exists());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandConverter::new(&[], Arc::new(DisabledModel)).is_err());
    }
}
