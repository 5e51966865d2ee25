//! Pipeline coordination: request validation, step sequencing, reporting.
//!
//! [`Indexer`] owns the injected collaborators (store, embedding executor,
//! chunker) and exposes the three pipeline operations: [`Indexer::scan`],
//! [`Indexer::embed`], and [`Indexer::all`]. Each validates the request
//! before any [`Run`] is allocated, so an invalid request never creates an
//! artifact directory. Step failures are folded into the returned
//! [`RunReport`]: `acceptance` flips to `fail`, the error chain is appended
//! to `risks`, and every artifact produced up to the failure point stays
//! visible to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chunker::TokenChunker;
use crate::config::Config;
use crate::embedding::EmbeddingExecutor;
use crate::runctx::Run;
use crate::store::Store;

/// Step identifiers used for run ids and reporting.
pub const STEP_SCAN: &str = "index.scan";
pub const STEP_EMBED: &str = "index.embed";
pub const STEP_ALL: &str = "index.all";

/// Input parameters for one pipeline invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceRequest {
    pub workspace_root: PathBuf,
    pub workspace_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
}

/// Final verdict of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Acceptance {
    Pass,
    Fail,
}

/// Summary of one pipeline step execution.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub step: String,
    pub started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<Acceptance>,
    pub artifact_paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl RunReport {
    fn begin(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            step: run.step.clone(),
            started: run.started,
            finished: None,
            acceptance: None,
            artifact_paths: Vec::new(),
            risks: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn pass(&mut self, run: &Run) {
        self.finished = Some(Utc::now());
        self.acceptance = Some(Acceptance::Pass);
        self.artifact_paths = run.artifacts();
    }

    fn fail(&mut self, run: &Run, risk: String) {
        self.acceptance = Some(Acceptance::Fail);
        self.risks.push(risk);
        self.artifact_paths = run.artifacts();
    }
}

/// Orchestrates workspace scanning and embedding.
///
/// Collaborators are injected at construction; nothing is reached through
/// ambient global state, which keeps the pipeline testable with substitute
/// stores and executors.
pub struct Indexer {
    pub(crate) cfg: Config,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) executor: Arc<dyn EmbeddingExecutor>,
    pub(crate) chunker: TokenChunker,
}

impl Indexer {
    pub fn new(
        cfg: Config,
        store: Arc<dyn Store>,
        executor: Arc<dyn EmbeddingExecutor>,
    ) -> Result<Self> {
        let chunker = TokenChunker::new(
            &cfg.chunking.tokenizer,
            cfg.chunking.max_tokens_per_chunk,
        )
        .context("tokenizer init")?;
        Ok(Self {
            cfg,
            store,
            executor,
            chunker,
        })
    }

    /// Index directories and files into the store.
    pub async fn scan(
        &self,
        req: &WorkspaceRequest,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        validate_request(req)?;
        let mut run = self.begin_run(req, STEP_SCAN)?;
        let mut report = RunReport::begin(&run);

        match self.perform_scan(&mut run, cancel).await {
            Ok(_) => report.pass(&run),
            Err(err) => report.fail(&run, format!("{err:#}")),
        }
        Ok(report)
    }

    /// Produce vectors for the workspace and store them.
    pub async fn embed(
        &self,
        req: &WorkspaceRequest,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        validate_request(req)?;
        let mut run = self.begin_run(req, STEP_EMBED)?;
        let mut report = RunReport::begin(&run);

        match self.perform_embedding(&mut run, cancel).await {
            Ok(_) => report.pass(&run),
            Err(err) => report.fail(&run, format!("{err:#}")),
        }
        Ok(report)
    }

    /// Run scan then embed sequentially under one run.
    ///
    /// A scan failure short-circuits embed; an embed failure after a good
    /// scan still reports the scan artifacts, so partial progress stays
    /// visible.
    pub async fn all(
        &self,
        req: &WorkspaceRequest,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        validate_request(req)?;
        let mut run = self.begin_run(req, STEP_ALL)?;
        let mut report = RunReport::begin(&run);

        if let Err(err) = self.perform_scan(&mut run, cancel).await {
            report.fail(&run, format!("scan failed: {err:#}"));
            return Ok(report);
        }
        if let Err(err) = self.perform_embedding(&mut run, cancel).await {
            report.fail(&run, format!("embedding failed: {err:#}"));
            return Ok(report);
        }

        report.pass(&run);
        Ok(report)
    }

    fn begin_run(&self, req: &WorkspaceRequest, step: &str) -> Result<Run> {
        Run::begin(
            &self.cfg.artifacts.root,
            req.run_id.as_deref(),
            &req.workspace_id,
            &req.workspace_root,
            step,
            None,
        )
    }
}

/// Reject invalid requests before any run state exists.
fn validate_request(req: &WorkspaceRequest) -> Result<()> {
    if req.workspace_root.as_os_str().is_empty() {
        bail!("workspace_root is required");
    }
    if req.workspace_id.trim().is_empty() {
        bail!("workspace_id is required");
    }
    let meta = std::fs::metadata(&req.workspace_root)
        .with_context(|| format!("workspace root access: {}", req.workspace_root.display()))?;
    if !meta.is_dir() {
        bail!(
            "workspace root {} is not a directory",
            req.workspace_root.display()
        );
    }
    Ok(())
}
