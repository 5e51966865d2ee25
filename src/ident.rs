//! Content addressing for store records.
//!
//! Every row the pipeline writes is keyed by a deterministic identifier
//! derived from an ordered tuple of strings: parts are trimmed, lowercased,
//! joined with `|`, hashed with SHA-256, and the first ten digest bytes are
//! hex-encoded under a short human-readable tag (`file-…`, `dir-…`, `vec-…`,
//! `wsv-…`). Re-deriving the same tuple always yields the same id, which is
//! what turns repeated scans into convergent upserts instead of duplicate
//! insertions.
//!
//! Full content hashes (whole files, chunk texts) use the same hash function
//! but keep the entire digest, so any single-byte change is detectable.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Digest bytes kept in a tagged short identifier (20 hex chars).
const ID_DIGEST_BYTES: usize = 10;

/// Derive a tagged short identifier from an ordered tuple of parts.
///
/// Case- and surrounding-whitespace-insensitive: `("Ws", "src")` and
/// `("ws ", "SRC")` produce the same id.
pub fn tagged_id(tag: &str, parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .map(|p| p.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("|");
    let digest = Sha256::digest(joined.as_bytes());
    format!("{}-{}", tag, hex::encode(&digest[..ID_DIGEST_BYTES]))
}

/// Storage key for a file row, derived from workspace id and relative path.
pub fn file_id(workspace_id: &str, relpath: &str) -> String {
    tagged_id("file", &[workspace_id, relpath])
}

/// Storage key for a directory row.
pub fn dir_id(workspace_id: &str, relpath: &str) -> String {
    tagged_id("dir", &[workspace_id, relpath])
}

/// Storage key for one chunk's vector row, unique per (workspace, file, index).
pub fn chunk_vector_id(workspace_id: &str, file_id: &str, index: usize) -> String {
    tagged_id("vec", &[workspace_id, file_id, "chunk", &index.to_string()])
}

/// Storage key for a workspace-level vector row (e.g. the centroid).
pub fn centroid_id(workspace_id: &str, model_slug: &str, kind: &str) -> String {
    tagged_id("wsv", &[workspace_id, model_slug, kind])
}

/// Full-length hex SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Full-length hex SHA-256 of a file's contents, streamed.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("read {} for hashing", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Normalize an embedding model name into a record slug.
///
/// Lowercases and collapses spaces and `/:@._` runs to single hyphens, so
/// `"text-embedding-3@v1.2"` and `"Text-Embedding-3@v1_2"` share a slug.
pub fn model_slug(model: &str) -> String {
    let mut slug = String::with_capacity(model.len());
    for ch in model.to_lowercase().chars() {
        match ch {
            ' ' | '/' | ':' | '@' | '.' | '_' => {
                if !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            '-' => {
                if !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            other => slug.push(other),
        }
    }
    slug.trim_matches('-').to_string()
}

/// Split a model name into (family, version) on the first hyphen.
///
/// Single-part names fall back to `(slug, "base")`.
pub fn split_model(model: &str) -> (String, String) {
    match model.split_once('-') {
        Some((family, version)) if !version.is_empty() => {
            (family.to_string(), version.to_string())
        }
        _ => (model_slug(model), "base".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_id_deterministic() {
        let a = tagged_id("file", &["ws1", "src/main.rs"]);
        let b = tagged_id("file", &["ws1", "src/main.rs"]);
        assert_eq!(a, b);
        assert!(a.starts_with("file-"));
        assert_eq!(a.len(), "file-".len() + ID_DIGEST_BYTES * 2);
    }

    #[test]
    fn test_tagged_id_case_and_whitespace_insensitive() {
        let a = tagged_id("dir", &["WS1", " src "]);
        let b = tagged_id("dir", &["ws1", "src"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tagged_id_part_order_matters() {
        let a = tagged_id("vec", &["a", "b"]);
        let b = tagged_id("vec", &["b", "a"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_bytes_sensitivity() {
        let a = hash_bytes(b"hello world");
        let b = hash_bytes(b"hello worle");
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, hash_bytes(b"hello world"));
    }

    #[test]
    fn test_hash_file_matches_hash_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.bin");
        std::fs::write(&path, b"some file contents").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"some file contents"));
    }

    #[test]
    fn test_model_slug_collapses_punctuation() {
        assert_eq!(model_slug("text-embedding-3@v1.2"), "text-embedding-3-v1-2");
        assert_eq!(model_slug("Snowflake/arctic_embed:latest"), "snowflake-arctic-embed-latest");
        assert_eq!(model_slug("--weird--"), "weird");
    }

    #[test]
    fn test_split_model() {
        let (family, version) = split_model("text-embedding-3-small");
        assert_eq!(family, "text");
        assert_eq!(version, "embedding-3-small");

        let (family, version) = split_model("nomic");
        assert_eq!(family, "nomic");
        assert_eq!(version, "base");
    }
}
