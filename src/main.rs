//! # Workspace Indexer CLI (`wsidx`)
//!
//! The `wsidx` binary drives the indexing pipeline against a workspace
//! directory. Each command prints the resulting run report as JSON and
//! exits non-zero when the step did not pass.
//!
//! ## Usage
//!
//! ```bash
//! wsidx --config ./config/wsidx.toml <command> --workspace-root <dir> --workspace-id <id>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wsidx scan` | Walk the workspace and index directory/file metadata |
//! | `wsidx embed` | Chunk and embed workspace text, store vectors |
//! | `wsidx all` | Scan then embed under one run |

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use workspace_indexer::config::{load_config, Config};
use workspace_indexer::embedding::HttpEmbedder;
use workspace_indexer::pipeline::{Acceptance, Indexer, RunReport, WorkspaceRequest};
use workspace_indexer::store::HttpStore;

/// Workspace Indexer — scan, chunk, embed, and store a workspace's
/// metadata/vector graph.
#[derive(Parser)]
#[command(
    name = "wsidx",
    about = "Workspace Indexer — deterministic scan/chunk/embed pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wsidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Request parameters shared by every pipeline command.
#[derive(Args)]
struct RequestArgs {
    /// Workspace root directory to index.
    #[arg(long)]
    workspace_root: PathBuf,

    /// Stable workspace identifier; record keys derive from it.
    #[arg(long)]
    workspace_id: String,

    /// Reuse an explicit run id instead of deriving one.
    #[arg(long)]
    run_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index directory and file metadata into the store.
    Scan(RequestArgs),

    /// Chunk and embed workspace text, storing vectors and the centroid.
    Embed(RequestArgs),

    /// Run scan then embed sequentially under one run.
    All(RequestArgs),
}

impl RequestArgs {
    fn into_request(self) -> WorkspaceRequest {
        WorkspaceRequest {
            workspace_root: self.workspace_root,
            workspace_id: self.workspace_id,
            run_id: self.run_id,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let indexer = build_indexer(&config)?;

    // Ctrl-C cancels cooperatively: the tree walk aborts at its next
    // checkpoint and in-flight calls are abandoned to their timeouts.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let report = match cli.command {
        Commands::Scan(args) => indexer.scan(&args.into_request(), &cancel).await?,
        Commands::Embed(args) => indexer.embed(&args.into_request(), &cancel).await?,
        Commands::All(args) => indexer.all(&args.into_request(), &cancel).await?,
    };

    print_report(&report)?;
    Ok(if report.acceptance == Some(Acceptance::Pass) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_indexer(config: &Config) -> Result<Indexer> {
    let store = HttpStore::new(
        &config.store.url,
        &config.store.user,
        &config.store.pass,
        &config.store.ns,
        &config.store.db,
        Duration::from_secs(config.store.timeout_secs),
    )?;
    let embedder = HttpEmbedder::new(
        &config.embedding.endpoint,
        &config.embedding.model,
        Duration::from_secs(config.embedding.timeout_secs),
    )?;
    Indexer::new(config.clone(), Arc::new(store), Arc::new(embedder))
}

fn print_report(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
