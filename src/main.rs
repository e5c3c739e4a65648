//! # docmark CLI
//!
//! The `docmark` binary runs the conversion service and exposes the cache
//! for local use.
//!
//! ## Usage
//!
//! ```bash
//! docmark --config ./config/docmark.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docmark init` | Create the SQLite database and run schema migrations |
//! | `docmark serve` | Start the HTTP API server |
//! | `docmark convert <paths>…` | Convert files (or directories) to markdown through the cache |
//! | `docmark fingerprint <file>` | Print the cache fingerprint of a file |
//! | `docmark cache stats` | Show cache entry count and stored size |
//! | `docmark completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! docmark init --config ./config/docmark.toml
//!
//! # Convert a report, bypassing the cache
//! docmark convert ./report.pdf --no-cache
//!
//! # Convert a directory into ./out/*.md
//! docmark convert ./docs --output ./out
//!
//! # Start the server
//! API_BEARER_TOKEN=secret docmark serve
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use docmark::batch::BatchItem;
use docmark::config::{self, Config};
use docmark::context::AppContext;
use docmark::convert::content_type_for_extension;
use docmark::{migrate, server};
use docmark_core::assemble::DOCUMENT_SEPARATOR;
use docmark_core::models::OutcomeStatus;
use docmark_core::{Document, FingerprintScheme};

/// docmark: a cached document-to-markdown conversion service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docmark.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docmark",
    about = "docmark: cached document-to-markdown conversion with an LLM agent mode",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docmark.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `document_cache` and
    /// `messages` tables. Safe to run repeatedly.
    Init,

    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Convert files to markdown through the conversion cache.
    ///
    /// Directories are walked recursively. Without `--output` the markdown
    /// is printed to stdout, documents separated by `---`.
    Convert {
        /// Files or directories to convert.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Declared content type. Inferred from each file's extension when
        /// omitted.
        #[arg(long = "type")]
        content_type: Option<String>,

        /// Skip the cache for both lookup and storage.
        #[arg(long)]
        no_cache: bool,

        /// Vision model for image files.
        #[arg(long)]
        model: Option<String>,

        /// Write `<name>.md` files into this directory instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the cache fingerprint of a file.
    Fingerprint {
        file: PathBuf,

        #[arg(long = "type")]
        content_type: Option<String>,
    },

    /// Inspect the conversion cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count and stored markdown size.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "docmark=debug" } else { "docmark=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "docmark", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Fingerprint { file, content_type } => {
            let scheme = config::load_config(&cli.config)
                .map(|c| c.cache.fingerprint)
                .unwrap_or_default();
            let doc = read_document(file, content_type.as_deref(), None)?;
            println!("{}  {}", scheme.fingerprint_document(&doc), file.display());
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Convert {
            paths,
            content_type,
            no_cache,
            model,
            output,
        } => {
            run_convert(&cfg, &paths, content_type.as_deref(), !no_cache, model, output.as_deref())
                .await?;
        }
        Commands::Cache {
            action: CacheAction::Stats,
        } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let stats = ctx.store.stats().await?;
            println!("Cache entries:   {}", stats.entries);
            println!("Markdown stored: {} bytes", stats.markdown_bytes);
            println!("Fingerprint:     {}", scheme_name(ctx.cache().scheme()));
        }
        Commands::Fingerprint { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}

fn scheme_name(scheme: FingerprintScheme) -> &'static str {
    match scheme {
        FingerprintScheme::ContentNameType => "content_name_type",
        FingerprintScheme::ContentName => "content_name",
    }
}

fn read_document(path: &Path, content_type: Option<&str>, model: Option<String>) -> Result<Document> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut doc = Document::new(bytes, name, "");
    doc.content_type = match content_type {
        Some(ct) => ct.to_string(),
        None => doc
            .extension()
            .and_then(|ext| content_type_for_extension(&ext))
            .unwrap_or("application/octet-stream")
            .to_string(),
    };
    doc.model = model;
    Ok(doc)
}

fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

async fn run_convert(
    cfg: &Config,
    paths: &[PathBuf],
    content_type: Option<&str>,
    use_cache: bool,
    model: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let files = collect_files(paths)?;
    let items = files
        .iter()
        .map(|path| read_document(path, content_type, model.clone()).map(BatchItem::from))
        .collect::<Result<Vec<_>>>()?;

    let ctx = AppContext::from_config(cfg).await?;
    let batch = ctx.orchestrator.resolve_batch(items, use_cache).await;

    if let Some(dir) = output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut printed = 0;
    for (outcome, path) in batch.outcomes.iter().zip(&files) {
        match &outcome.status {
            OutcomeStatus::Converted { markdown, source } => match output {
                Some(dir) => {
                    let target = dir.join(markdown_file_name(path));
                    std::fs::write(&target, markdown)
                        .with_context(|| format!("Failed to write {}", target.display()))?;
                    println!("{} -> {} ({:?})", path.display(), target.display(), source);
                }
                None => {
                    if printed > 0 {
                        print!("{}", DOCUMENT_SEPARATOR);
                    }
                    print!("{}", markdown);
                    printed += 1;
                }
            },
            OutcomeStatus::Failed { reason } => {
                eprintln!("Failed to convert {}: {}", path.display(), reason);
            }
        }
    }
    if output.is_none() && printed > 0 {
        println!();
    }

    if batch.is_exhausted() {
        bail!("{}", batch.failure_summary());
    }
    Ok(())
}

fn markdown_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    format!("{}.md", stem)
}
