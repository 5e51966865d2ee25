//! Embedding orchestrator: collect, chunk, embed, persist.
//!
//! Re-walks the workspace independently of the scanner (so the embed step
//! can run standalone), selects text files under the size ceiling, splits
//! each through the token chunker, batches every chunk to the embedding
//! executor in order, and persists the model record, one vector row per
//! chunk, and the workspace centroid, along with the `vectors.ndjson`
//! evidence artifact.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use walkdir::WalkDir;

use crate::ident;
use crate::models::{CentroidRow, ChunkRecord, VectorChunkRow, VectorModel};
use crate::pipeline::Indexer;
use crate::runctx::{write_ndjson, Run};
use crate::scan::{normalize_rel_path, should_skip_dir};

/// Bytes of a file inspected for the binary heuristic.
const BINARY_SAMPLE_BYTES: usize = 1024;

/// Kind tag on the workspace centroid row.
const CENTROID_KIND: &str = "centroid@file";

impl Indexer {
    pub(crate) async fn perform_embedding(
        &self,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let root = run.workspace_root.clone();

        let mut chunks = self.collect_embed_chunks(&root, cancel)?;
        if chunks.is_empty() {
            bail!("no embeddable files discovered under {}", root.display());
        }

        self.populate_vectors(&mut chunks, cancel).await?;

        if let Err(err) = self.write_embed_records(&run.workspace_id, &chunks).await {
            warn!(
                workspace = %run.workspace_id,
                error = %format!("{err:#}"),
                "embed store writes failed"
            );
            return Err(err)
                .with_context(|| format!("store exec (embed) workspace {}", run.workspace_id));
        }

        let artifact = write_ndjson(&run.artifact_dir, "vectors.ndjson", &chunks)?;
        run.add_artifact(artifact);

        Ok(())
    }

    /// Walk the tree and chunk every eligible file.
    ///
    /// Eligible: regular, non-empty, at most the configured size ceiling,
    /// and not binary (no NUL byte in the first KiB; content must also be
    /// valid UTF-8 to tokenize).
    fn collect_embed_chunks(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChunkRecord>> {
        let max_bytes = self.cfg.embedding.max_file_bytes;
        let mut chunks = Vec::new();

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            !(entry.file_type().is_dir() && should_skip_dir(entry.file_name()))
        });

        for entry in walker {
            if cancel.is_cancelled() {
                bail!("embedding cancelled");
            }
            let entry = entry.context("walk workspace tree")?;
            if entry.file_type().is_dir() {
                continue;
            }
            let meta = entry
                .metadata()
                .with_context(|| format!("stat {}", entry.path().display()))?;
            if !meta.is_file() || meta.len() == 0 || meta.len() > max_bytes {
                continue;
            }

            let content = std::fs::read(entry.path())
                .with_context(|| format!("read {}", entry.path().display()))?;
            if is_binary(&content) {
                continue;
            }
            let text = match String::from_utf8(content) {
                Ok(text) => text,
                // Not tokenizable; treat like binary.
                Err(_) => continue,
            };

            let mut rel = normalize_rel_path(root, entry.path());
            if rel.is_empty() {
                rel = entry.file_name().to_string_lossy().to_string();
            }

            let token_chunks = self
                .chunker
                .chunk(&text)
                .with_context(|| format!("chunk {rel}"))?;
            for (index, tc) in token_chunks.into_iter().enumerate() {
                chunks.push(ChunkRecord {
                    relpath: rel.clone(),
                    index,
                    start: tc.start,
                    end: tc.end,
                    token_count: tc.token_count,
                    content_sha: ident::hash_bytes(tc.text.as_bytes()),
                    size: tc.text.len() as i64,
                    vector: Vec::new(),
                    native_dim: 0,
                    text: tc.text,
                });
            }
        }

        Ok(chunks)
    }

    /// Submit chunk batches to the executor strictly in order and attach
    /// vectors back by index.
    async fn populate_vectors(
        &self,
        chunks: &mut [ChunkRecord],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let batch_size = self.cfg.embedding.batch_size;
        for batch in chunks.chunks_mut(batch_size) {
            let inputs: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = tokio::select! {
                _ = cancel.cancelled() => bail!("embedding cancelled"),
                res = self.executor.embed(&inputs) => res?,
            };
            if vectors.len() != batch.len() {
                bail!(
                    "embedding returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                );
            }
            for (chunk, vector) in batch.iter_mut().zip(vectors) {
                if vector.is_empty() {
                    bail!("embedding returned empty vector for {}", chunk.relpath);
                }
                chunk.native_dim = vector.len();
                chunk.vector = vector;
            }
        }
        Ok(())
    }

    async fn write_embed_records(&self, ws_id: &str, chunks: &[ChunkRecord]) -> Result<()> {
        let model_name = &self.cfg.embedding.model;
        let slug = ident::model_slug(model_name);
        let (family, version) = ident::split_model(model_name);

        let native_dim = chunks
            .iter()
            .map(|c| c.vector.len())
            .find(|n| *n > 0)
            .ok_or_else(|| anyhow!("no vectors available to determine native dim"))?;

        let model_row = VectorModel {
            slug: slug.clone(),
            family,
            version,
            native_dim,
            model_sha: self.cfg.embedding.model_sha.clone(),
            notes: "generated via workspace-indexer".to_string(),
        };
        self.store
            .upsert("vector_model", &slug, serde_json::to_value(&model_row)?)
            .await
            .with_context(|| format!("upsert vector model {slug}"))?;

        for chunk in chunks {
            if chunk.vector.is_empty() {
                bail!("missing embedding for {}", chunk.relpath);
            }
            let file_rec = ident::file_id(ws_id, &chunk.relpath);
            let vec_id = ident::chunk_vector_id(ws_id, &file_rec, chunk.index);
            let row = VectorChunkRow {
                ws: ws_id.to_string(),
                file: file_rec.clone(),
                granularity: "chunk".to_string(),
                index: chunk.index,
                start: chunk.start,
                end: chunk.end,
                token_count: chunk.token_count,
                content_sha: chunk.content_sha.clone(),
                model: slug.clone(),
                model_sha: self.cfg.embedding.model_sha.clone(),
                native_dim: chunk.native_dim,
                effective_dim: self.cfg.embedding.effective_dim,
                transform_id: self.cfg.embedding.transform_id.clone(),
                vector: chunk.vector.clone(),
                ts: Utc::now(),
            };
            self.store
                .upsert("vector_chunk", &vec_id, serde_json::to_value(&row)?)
                .await
                .with_context(|| format!("upsert vector chunk {} #{}", chunk.relpath, chunk.index))?;
            self.store
                .relate(
                    ("file", &file_rec),
                    "file_has_vector",
                    ("vector_chunk", &vec_id),
                    None,
                )
                .await?;
        }

        // Whole-workspace centroid over vectors matching the native dim,
        // recomputed from scratch each run.
        let (centroid, sample_count) = centroid_of(chunks, native_dim);
        if sample_count > 0 {
            let wsv_id = ident::centroid_id(ws_id, &slug, CENTROID_KIND);
            let row = CentroidRow {
                ws: ws_id.to_string(),
                kind: CENTROID_KIND.to_string(),
                model: slug.clone(),
                vector: centroid,
                sample_count,
                ts: Utc::now(),
            };
            self.store
                .upsert("workspace_vector", &wsv_id, serde_json::to_value(&row)?)
                .await
                .context("upsert workspace centroid")?;
            self.store
                .relate(
                    ("workspace", ws_id),
                    "workspace_has_vector",
                    ("workspace_vector", &wsv_id),
                    None,
                )
                .await?;
        }

        Ok(())
    }
}

/// NUL byte within the first KiB marks the content binary.
fn is_binary(content: &[u8]) -> bool {
    let sample = content.len().min(BINARY_SAMPLE_BYTES);
    content[..sample].contains(&0)
}

/// Per-dimension arithmetic mean over chunks whose vector length equals
/// `dim`, with the number of contributors.
fn centroid_of(chunks: &[ChunkRecord], dim: usize) -> (Vec<f32>, usize) {
    let mut centroid = vec![0f32; dim];
    let mut sample_count = 0usize;
    for chunk in chunks {
        if chunk.vector.len() != dim {
            continue;
        }
        for (acc, v) in centroid.iter_mut().zip(&chunk.vector) {
            *acc += v;
        }
        sample_count += 1;
    }
    if sample_count > 0 {
        for acc in centroid.iter_mut() {
            *acc /= sample_count as f32;
        }
    }
    (centroid, sample_count)
}
