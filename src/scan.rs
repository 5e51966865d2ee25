//! Workspace scanner: walk, classify, hash, persist, attest.
//!
//! Walks the workspace tree (skipping well-known noise directories),
//! computes a marker hash for every directory and a full content hash for
//! every regular file, upserts the rows under their content-addressed keys,
//! re-establishes containment edges, and writes the `files.ndjson` /
//! `dirs.ndjson` evidence artifacts. Because keys are derived from
//! `(workspace_id, relpath)`, re-scanning an unchanged tree converges to a
//! no-op in the store.

use std::ffi::OsStr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use walkdir::WalkDir;

use crate::ident;
use crate::models::{DirRecord, DirRow, FileRecord, FileRow};
use crate::pipeline::Indexer;
use crate::runctx::{write_ndjson, Run};

/// Directory names never descended into, matched case-insensitively.
const SKIP_DIRS: [&str; 6] = [".git", ".hg", ".svn", "node_modules", ".idea", ".vscode"];

impl Indexer {
    pub(crate) async fn perform_scan(
        &self,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let root = run.workspace_root.clone();
        let ws_id = run.workspace_id.clone();

        // The workspace row must exist before any containment edge points
        // at it.
        self.store
            .upsert(
                "workspace",
                &ws_id,
                serde_json::json!({
                    "path": root.to_string_lossy(),
                    "vcs": "",
                    "rev": "",
                    "content_sha": "",
                }),
            )
            .await
            .with_context(|| format!("upsert workspace {ws_id}"))?;

        let (dirs, files) = walk_workspace(&root, cancel)?;

        if let Err(err) = self.write_scan_records(&ws_id, &dirs, &files).await {
            warn!(workspace = %ws_id, error = %format!("{err:#}"), "scan store writes failed");
            return Err(err).with_context(|| format!("store exec (scan) workspace {ws_id}"));
        }

        let files_artifact = write_ndjson(&run.artifact_dir, "files.ndjson", &files)?;
        run.add_artifact(files_artifact);

        let dirs_artifact = write_ndjson(&run.artifact_dir, "dirs.ndjson", &dirs)?;
        run.add_artifact(dirs_artifact);

        Ok(())
    }

    async fn write_scan_records(
        &self,
        ws_id: &str,
        dirs: &[DirRecord],
        files: &[FileRecord],
    ) -> Result<()> {
        for dir in dirs {
            let id = ident::dir_id(ws_id, &dir.relpath);
            let row = DirRow {
                ws: ws_id.to_string(),
                relpath: dir.relpath.clone(),
                sha: dir.hash.clone(),
            };
            self.store
                .upsert("directory", &id, serde_json::to_value(&row)?)
                .await
                .with_context(|| format!("upsert directory {}", dir.relpath))?;
            self.store
                .relate(("workspace", ws_id), "ws_contains_dir", ("directory", &id), None)
                .await?;

            if !dir.relpath.is_empty() {
                let parent_id = ident::dir_id(ws_id, parent_dir_rel(&dir.relpath));
                self.store
                    .relate(
                        ("directory", &parent_id),
                        "dir_contains_dir",
                        ("directory", &id),
                        None,
                    )
                    .await?;
            }
        }

        for file in files {
            let id = ident::file_id(ws_id, &file.relpath);
            let row = FileRow {
                ws: ws_id.to_string(),
                relpath: file.relpath.clone(),
                lang: file.lang.clone(),
                size: file.size,
                mtime: file.mtime,
                sha: file.hash.clone(),
            };
            self.store
                .upsert("file", &id, serde_json::to_value(&row)?)
                .await
                .with_context(|| format!("upsert file {}", file.relpath))?;

            let parent_id = ident::dir_id(ws_id, parent_dir_rel(&file.relpath));
            self.store
                .relate(
                    ("directory", &parent_id),
                    "dir_contains_file",
                    ("file", &id),
                    None,
                )
                .await?;
        }

        Ok(())
    }
}

/// Collect directory and file metadata under `root`.
///
/// Fails fast on walk errors, hashing errors, and cancellation; no partial
/// store commit is attempted in that case.
fn walk_workspace(
    root: &Path,
    cancel: &CancellationToken,
) -> Result<(Vec<DirRecord>, Vec<FileRecord>)> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && should_skip_dir(entry.file_name())));

    for entry in walker {
        if cancel.is_cancelled() {
            bail!("scan cancelled");
        }
        let entry = entry.context("walk workspace tree")?;
        let meta = entry
            .metadata()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        let rel = normalize_rel_path(root, entry.path());
        let mtime = mtime_utc(&meta);

        if entry.file_type().is_dir() {
            dirs.push(DirRecord {
                relpath: rel,
                hash: ident::hash_bytes(entry.path().to_string_lossy().as_bytes()),
                mtime,
            });
            continue;
        }
        if !meta.is_file() {
            continue;
        }

        let hash = ident::hash_file(entry.path())
            .with_context(|| format!("hash file {}", entry.path().display()))?;
        files.push(FileRecord {
            relpath: rel,
            size: meta.len() as i64,
            mtime,
            hash,
            lang: detect_language(entry.path()),
        });
    }

    Ok((dirs, files))
}

pub(crate) fn should_skip_dir(name: &OsStr) -> bool {
    let name = name.to_string_lossy().to_lowercase();
    SKIP_DIRS.contains(&name.as_str())
}

/// Workspace-relative, slash-normalized path; empty string for the root.
pub(crate) fn normalize_rel_path(root: &Path, path: &Path) -> String {
    let rel = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return String::new(),
    };
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parent of a slash-normalized relative path; empty string at the root.
pub(crate) fn parent_dir_rel(rel: &str) -> &str {
    match rel.rsplit_once('/') {
        Some((parent, _)) => parent,
        None => "",
    }
}

pub(crate) fn mtime_utc(meta: &std::fs::Metadata) -> DateTime<Utc> {
    let modified = meta
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    DateTime::<Utc>::from(modified)
}

/// Map a file extension to a language hint. The fallback is the bare
/// extension, or `text` when there is none.
fn detect_language(path: &Path) -> String {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => return "text".to_string(),
    };
    match ext.as_str() {
        "go" => "go",
        "py" => "python",
        "rs" => "rust",
        "js" => "javascript",
        "ts" => "typescript",
        "tsx" => "tsx",
        "jsx" => "jsx",
        "sh" | "bash" => "shell",
        "ps1" => "powershell",
        "md" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        other => return other.to_string(),
    }
    .to_string()
}
