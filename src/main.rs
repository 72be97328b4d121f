//! # Repository Analyzer CLI (`rana`)
//!
//! The `rana` binary serves the analysis API and runs one-off analyses from
//! the terminal.
//!
//! ## Usage
//!
//! ```bash
//! rana --config ./config/rana.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rana serve` | Start the HTTP server (SSE progress streams) |
//! | `rana analyze <owner/repo>` | Analyze one repository, report JSON on stdout |
//! | `rana chunk <file>` | Show how a local file would be chunked |
//!
//! ## Examples
//!
//! ```bash
//! # Serve the API on [server].bind
//! rana serve
//!
//! # Knowledge-transfer report for a repository, progress as JSON lines
//! GITHUB_TOKEN=... rana analyze acme/salesforce-app --mode kt --progress json > report.json
//!
//! # Check chunk sizes before spending tokens
//! rana chunk force-app/main/default/classes/AccountService.cls
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` (default `repo_analyzer=info`) to
//! change verbosity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use repo_analyzer::cache::InMemoryCache;
use repo_analyzer::chunk::split_content;
use repo_analyzer::config::{self, Config};
use repo_analyzer::llm::OllamaGenerator;
use repo_analyzer::models::AnalysisMode;
use repo_analyzer::orchestrator::Orchestrator;
use repo_analyzer::progress::ProgressMode;
use repo_analyzer::server;
use repo_analyzer::source::GitHubSource;

/// Repository Analyzer: LLM-backed code review and onboarding docs for
/// Salesforce repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rana.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rana",
    about = "Repository Analyzer: LLM-backed code review and onboarding docs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rana.toml`. When the file does not exist the
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/rana.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/api/analyze`,
    /// `/api/analyze/kt`, `/api/analyze/custom` and `/health`.
    Serve,

    /// Analyze one repository and print the report as JSON on stdout.
    ///
    /// Files are listed and fetched through the GitHub contents API using
    /// the token in `[source].token_env` (default `GITHUB_TOKEN`).
    Analyze {
        /// Repository as `owner/name`.
        repository: String,

        /// Analysis mode: `standard` or `kt`.
        #[arg(long, default_value = "standard")]
        mode: AnalysisMode,

        /// Progress output on stderr: `human`, `json`, or `off`.
        /// Default: `human` when stderr is a TTY, otherwise `json`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Split a local file the way the analyzer would and print chunk sizes.
    ///
    /// Makes no generation calls.
    Chunk {
        /// File to split.
        path: PathBuf,

        /// Mode whose token budget sizes the chunks.
        #[arg(long, default_value = "standard")]
        mode: AnalysisMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Analyze {
            repository,
            mode,
            progress,
        } => {
            let progress = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some(raw) => match ProgressMode::parse(raw) {
                    Some(p) => p,
                    None => bail!("--progress must be one of: human, json, off"),
                },
            };
            cmd_analyze(&cfg, &repository, mode, progress).await?;
        }
        Commands::Chunk { path, mode } => {
            cmd_chunk(&cfg, &path, mode)?;
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("repo_analyzer=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

async fn cmd_analyze(
    cfg: &Config,
    repository: &str,
    mode: AnalysisMode,
    progress: ProgressMode,
) -> Result<()> {
    let config = Arc::new(cfg.clone());
    let generator = Arc::new(OllamaGenerator::new(&config.llm)?);
    let orchestrator = Orchestrator::new(config.clone(), generator, Arc::new(InMemoryCache::new()))?;
    let source = GitHubSource::new(&config.source, None)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling analysis");
            on_interrupt.cancel();
        }
    });

    let report = orchestrator
        .run(repository, mode, &source, progress.sink(), cancel)
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_chunk(cfg: &Config, path: &Path, mode: AnalysisMode) -> Result<()> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let max_chars = cfg.max_chunk_chars(mode);
    let chunks = split_content(&content, max_chars)?;

    println!(
        "{}: {} chunk(s), max {} chars each ({} mode)",
        path.display(),
        chunks.len(),
        max_chars,
        mode
    );
    for chunk in &chunks {
        println!(
            "  #{:<4} {:>6} chars  {:>5} lines",
            chunk.sequence_index,
            chunk.text.chars().count(),
            chunk.text.lines().count()
        );
    }
    Ok(())
}
