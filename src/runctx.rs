//! Run lifecycle: identifier derivation and artifact accounting.
//!
//! A [`Run`] represents one timed execution of a pipeline step. It owns an
//! artifact directory under `<artifact_root>/<run_id>/` and accumulates the
//! paths of every evidence file written during the step. Run ids are either
//! caller-supplied or derived deterministically from the workspace, the step
//! name, and the start timestamp, so replaying the same invocation converges
//! on the same artifact directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// One orchestrated run of an index step.
#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub workspace_id: String,
    pub workspace_root: PathBuf,
    pub step: String,
    pub started: DateTime<Utc>,
    pub artifact_dir: PathBuf,

    artifacts: Vec<PathBuf>,
}

impl Run {
    /// Allocate a run and create its artifact directory.
    ///
    /// When `run_id` is absent a deterministic id is derived via
    /// [`generate_run_id`]. Fails if `step` is empty or the artifact
    /// directory cannot be created.
    pub fn begin(
        artifact_root: &Path,
        run_id: Option<&str>,
        workspace_id: &str,
        workspace_root: &Path,
        step: &str,
        started: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        if step.trim().is_empty() {
            bail!("step is required");
        }
        let started = started.unwrap_or_else(Utc::now);
        let run_id = match run_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => generate_run_id(workspace_id, step, started),
        };

        let artifact_dir = artifact_root.join(&run_id);
        fs::create_dir_all(&artifact_dir)
            .with_context(|| format!("create artifact dir {}", artifact_dir.display()))?;

        Ok(Self {
            run_id,
            workspace_id: workspace_id.to_string(),
            workspace_root: workspace_root.to_path_buf(),
            step: step.to_string(),
            started,
            artifact_dir,
            artifacts: Vec::new(),
        })
    }

    /// Record a path written inside the run's artifact tree.
    ///
    /// Append-only; duplicates are tolerated, blank paths ignored.
    pub fn add_artifact(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return;
        }
        self.artifacts.push(path);
    }

    /// All artifacts registered so far, as a copy.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.artifacts.clone()
    }
}

/// Create `RUN-YYYYMMDD-<8 hex>` identifiers.
///
/// The digest covers `workspace_id|step|<RFC3339-nanos start>`, so the same
/// triple always maps to the same id while a different step or timestamp
/// yields a fresh one.
pub fn generate_run_id(workspace_id: &str, step: &str, started: DateTime<Utc>) -> String {
    let stamp = started.to_rfc3339_opts(SecondsFormat::Nanos, true);
    let input = format!("{workspace_id}|{step}|{stamp}");
    let digest = Sha256::digest(input.as_bytes());
    format!(
        "RUN-{}-{}",
        started.format("%Y%m%d"),
        hex::encode(&digest[..4])
    )
}

/// Write rows as NDJSON (one JSON object per line) into `dir/name`.
///
/// Returns the artifact path. Existing files are truncated.
pub fn write_ndjson<T: Serialize>(dir: &Path, name: &str, rows: &[T]) -> Result<PathBuf> {
    let path = dir.join(name);
    let file = fs::File::create(&path)
        .with_context(|| format!("write artifact {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, row)
            .with_context(|| format!("encode artifact row for {}", path.display()))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(path)
}
