//! Record types that flow through the pipeline.
//!
//! Artifact rows ([`DirRecord`], [`FileRecord`], [`ChunkRecord`]) serialize
//! directly into the run's NDJSON evidence files. Store rows ([`DirRow`],
//! [`FileRow`], [`VectorChunkRow`], [`VectorModel`], [`CentroidRow`]) are the
//! typed shapes handed to the store, converted to its dynamic wire format
//! only at the collaborator edge.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Directory metadata as captured during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct DirRecord {
    pub relpath: String,
    /// Stable marker digest of the directory's own path string, not a
    /// content hash of its children.
    pub hash: String,
    pub mtime: DateTime<Utc>,
}

/// Regular-file metadata as captured during a scan.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub relpath: String,
    pub size: i64,
    pub mtime: DateTime<Utc>,
    /// Full-length hex digest of the file bytes.
    pub hash: String,
    /// Extension-derived language hint; never used for correctness.
    pub lang: String,
}

/// One token-bounded chunk of a file, with its vector once embedded.
///
/// Serializes as a `vectors.ndjson` row; the text itself stays out of the
/// artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkRecord {
    pub relpath: String,
    pub index: usize,
    /// Byte offsets into the original file text; chunks for one file are
    /// contiguous and their texts concatenate back to the file exactly.
    pub start: usize,
    pub end: usize,
    pub token_count: usize,
    pub content_sha: String,
    pub size: i64,
    pub vector: Vec<f32>,
    pub native_dim: usize,
    #[serde(skip)]
    pub text: String,
}

/// Directory row in the store.
#[derive(Debug, Clone, Serialize)]
pub struct DirRow {
    pub ws: String,
    pub relpath: String,
    pub sha: String,
}

/// File row in the store.
#[derive(Debug, Clone, Serialize)]
pub struct FileRow {
    pub ws: String,
    pub relpath: String,
    pub lang: String,
    pub size: i64,
    pub mtime: DateTime<Utc>,
    pub sha: String,
}

/// Embedding model metadata row.
#[derive(Debug, Clone, Serialize)]
pub struct VectorModel {
    pub slug: String,
    pub family: String,
    pub version: String,
    pub native_dim: usize,
    pub model_sha: String,
    pub notes: String,
}

/// Per-chunk vector row in the store.
#[derive(Debug, Clone, Serialize)]
pub struct VectorChunkRow {
    pub ws: String,
    pub file: String,
    pub granularity: String,
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub token_count: usize,
    pub content_sha: String,
    pub model: String,
    pub model_sha: String,
    pub native_dim: usize,
    /// Provenance only: any dimensionality reduction happens upstream of
    /// storage, never here.
    pub effective_dim: usize,
    pub transform_id: String,
    pub vector: Vec<f32>,
    pub ts: DateTime<Utc>,
}

/// Workspace-level centroid vector row.
#[derive(Debug, Clone, Serialize)]
pub struct CentroidRow {
    pub ws: String,
    pub kind: String,
    pub model: String,
    pub vector: Vec<f32>,
    pub sample_count: usize,
    pub ts: DateTime<Utc>,
}
