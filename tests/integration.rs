use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use workspace_indexer::config::Config;
use workspace_indexer::embedding::EmbeddingExecutor;
use workspace_indexer::pipeline::{Acceptance, Indexer, WorkspaceRequest};
use workspace_indexer::store::MemoryStore;

const DIMS: usize = 8;

/// Deterministic executor: folds text bytes into a fixed-dimension vector.
struct FakeExecutor;

#[async_trait]
impl EmbeddingExecutor for FakeExecutor {
    fn model(&self) -> &str {
        "fake-embed-v1"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs
            .iter()
            .map(|text| {
                let mut v = vec![0f32; DIMS];
                for (i, b) in text.bytes().enumerate() {
                    v[i % DIMS] += f32::from(b) / 255.0;
                }
                v
            })
            .collect())
    }
}

/// Executor that drops one vector from every response.
struct MismatchExecutor;

#[async_trait]
impl EmbeddingExecutor for MismatchExecutor {
    fn model(&self) -> &str {
        "fake-embed-v1"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Vec<f32>> = inputs.iter().map(|_| vec![0.5; DIMS]).collect();
        vectors.pop();
        Ok(vectors)
    }
}

/// Executor that returns an empty vector for every input.
struct EmptyVectorExecutor;

#[async_trait]
impl EmbeddingExecutor for EmptyVectorExecutor {
    fn model(&self) -> &str {
        "fake-embed-v1"
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|_| Vec::new()).collect())
    }
}

fn test_config(artifact_root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.artifacts.root = artifact_root.to_path_buf();
    cfg.embedding.model = "fake-embed-v1".to_string();
    cfg.embedding.batch_size = 4;
    cfg
}

/// Two-file workspace: a markdown readme and a source file in a subdir.
fn setup_workspace() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("README.md"), "# Title\nBody text\n").unwrap();
    fs::create_dir_all(tmp.path().join("src")).unwrap();
    fs::write(
        tmp.path().join("src/main.ext"),
        "fn main() { println!(\"indexed\"); }\n",
    )
    .unwrap();
    tmp
}

fn build_indexer(
    artifact_root: &Path,
    store: Arc<MemoryStore>,
    executor: Arc<dyn EmbeddingExecutor>,
) -> Indexer {
    Indexer::new(test_config(artifact_root), store, executor).unwrap()
}

fn request(ws: &TempDir) -> WorkspaceRequest {
    WorkspaceRequest {
        workspace_root: ws.path().to_path_buf(),
        workspace_id: "ws-test".to_string(),
        run_id: None,
    }
}

fn read_ndjson(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn artifact_named(report_paths: &[std::path::PathBuf], name: &str) -> Option<std::path::PathBuf> {
    report_paths
        .iter()
        .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(name))
        .cloned()
}

#[tokio::test]
async fn test_all_end_to_end_pass() {
    let ws = setup_workspace();
    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store.clone(), Arc::new(FakeExecutor));

    let report = indexer
        .all(&request(&ws), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.acceptance, Some(Acceptance::Pass), "risks: {:?}", report.risks);
    assert!(report.finished.is_some());
    assert!(report.risks.is_empty());

    // All three evidence artifacts are registered and on disk.
    let files_path = artifact_named(&report.artifact_paths, "files.ndjson").unwrap();
    let dirs_path = artifact_named(&report.artifact_paths, "dirs.ndjson").unwrap();
    let vectors_path = artifact_named(&report.artifact_paths, "vectors.ndjson").unwrap();

    let files = read_ndjson(&files_path);
    assert_eq!(files.len(), 2);
    let readme = files.iter().find(|f| f["relpath"] == "README.md").unwrap();
    assert_eq!(readme["size"], "# Title\nBody text\n".len() as i64);
    assert_eq!(readme["lang"], "markdown");
    let main = files.iter().find(|f| f["relpath"] == "src/main.ext").unwrap();
    assert_eq!(
        main["size"],
        "fn main() { println!(\"indexed\"); }\n".len() as i64
    );

    let dirs = read_ndjson(&dirs_path);
    assert!(dirs.iter().any(|d| d["relpath"] == ""), "root dir entry missing");
    assert!(dirs.iter().any(|d| d["relpath"] == "src"));

    // At least one chunk per file, all vectors the same non-zero length.
    let vectors = read_ndjson(&vectors_path);
    assert!(vectors.iter().any(|v| v["relpath"] == "README.md"));
    assert!(vectors.iter().any(|v| v["relpath"] == "src/main.ext"));
    for row in &vectors {
        assert_eq!(row["native_dim"], DIMS as i64);
        assert_eq!(row["vector"].as_array().unwrap().len(), DIMS);
        assert!(row.get("text").is_none(), "chunk text must not leak into artifacts");
    }

    // Store holds the graph: workspace, dirs, files, vectors, centroid.
    assert!(store.get("workspace", "ws-test").is_some());
    assert_eq!(store.rows("file").len(), 2);
    assert_eq!(store.rows("directory").len(), 2);
    assert_eq!(store.rows("vector_chunk").len(), vectors.len());
    assert_eq!(store.rows("vector_model").len(), 1);
    assert_eq!(store.rows("workspace_vector").len(), 1);

    let edges = store.edges();
    assert!(edges.iter().any(|e| e.edge == "ws_contains_dir"));
    assert!(edges.iter().any(|e| e.edge == "dir_contains_dir"));
    assert!(edges.iter().any(|e| e.edge == "dir_contains_file"));
    assert!(edges.iter().any(|e| e.edge == "file_has_vector"));
    assert!(edges.iter().any(|e| e.edge == "workspace_has_vector"));
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let ws = setup_workspace();
    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store.clone(), Arc::new(FakeExecutor));
    let cancel = CancellationToken::new();

    let first = indexer.scan(&request(&ws), &cancel).await.unwrap();
    assert_eq!(first.acceptance, Some(Acceptance::Pass));

    let file_ids: Vec<String> = store.rows("file").into_iter().map(|(id, _)| id).collect();
    let dir_ids: Vec<String> = store.rows("directory").into_iter().map(|(id, _)| id).collect();
    let edge_count = store.edges().len();

    let second = indexer.scan(&request(&ws), &cancel).await.unwrap();
    assert_eq!(second.acceptance, Some(Acceptance::Pass));

    let file_ids_after: Vec<String> = store.rows("file").into_iter().map(|(id, _)| id).collect();
    let dir_ids_after: Vec<String> =
        store.rows("directory").into_iter().map(|(id, _)| id).collect();

    assert_eq!(file_ids, file_ids_after, "file keys must be stable across scans");
    assert_eq!(dir_ids, dir_ids_after, "directory keys must be stable across scans");
    assert_eq!(store.edges().len(), edge_count, "edges must not duplicate");
}

#[tokio::test]
async fn test_all_reports_partial_failure() {
    let ws = setup_workspace();
    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store.clone(), Arc::new(MismatchExecutor));

    let report = indexer
        .all(&request(&ws), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.acceptance, Some(Acceptance::Fail));
    assert!(report.finished.is_none());

    // Scan evidence survives; the vectors artifact was never written.
    assert!(artifact_named(&report.artifact_paths, "files.ndjson").is_some());
    assert!(artifact_named(&report.artifact_paths, "dirs.ndjson").is_some());
    assert!(artifact_named(&report.artifact_paths, "vectors.ndjson").is_none());

    assert!(!report.risks.is_empty());
    assert!(
        report.risks[0].contains("embedding"),
        "risk should name the embedding failure: {:?}",
        report.risks
    );

    // No vector rows were committed.
    assert_eq!(store.rows("vector_chunk").len(), 0);
    assert_eq!(store.rows("workspace_vector").len(), 0);
}

#[tokio::test]
async fn test_embed_rejects_empty_vectors() {
    let ws = setup_workspace();
    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store, Arc::new(EmptyVectorExecutor));

    let report = indexer
        .embed(&request(&ws), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.acceptance, Some(Acceptance::Fail));
    assert!(report.risks[0].contains("empty vector"), "risks: {:?}", report.risks);
}

#[tokio::test]
async fn test_embed_fails_on_workspace_without_text() {
    let ws = TempDir::new().unwrap();
    // One binary file only: NUL in the first KiB excludes it.
    fs::write(ws.path().join("blob.bin"), b"\x00\x01\x02\x03").unwrap();

    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store, Arc::new(FakeExecutor));

    let report = indexer
        .embed(&request(&ws), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.acceptance, Some(Acceptance::Fail));
    assert!(
        report.risks[0].contains("no embeddable files"),
        "risks: {:?}",
        report.risks
    );
}

#[tokio::test]
async fn test_centroid_is_mean_of_chunk_vectors() {
    let ws = setup_workspace();
    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store.clone(), Arc::new(FakeExecutor));

    let report = indexer
        .embed(&request(&ws), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.acceptance, Some(Acceptance::Pass), "risks: {:?}", report.risks);

    let chunk_vectors: Vec<Vec<f64>> = store
        .rows("vector_chunk")
        .into_iter()
        .map(|(_, row)| {
            row["vector"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_f64().unwrap())
                .collect()
        })
        .collect();
    assert!(!chunk_vectors.is_empty());

    let centroids = store.rows("workspace_vector");
    assert_eq!(centroids.len(), 1);
    let centroid_row = &centroids[0].1;
    assert_eq!(centroid_row["kind"], "centroid@file");
    assert_eq!(centroid_row["sample_count"], chunk_vectors.len() as i64);

    let centroid: Vec<f64> = centroid_row["vector"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(centroid.len(), DIMS);

    for d in 0..DIMS {
        let mean: f64 =
            chunk_vectors.iter().map(|v| v[d]).sum::<f64>() / chunk_vectors.len() as f64;
        assert!(
            (centroid[d] - mean).abs() < 1e-4,
            "dimension {d}: centroid {} vs mean {}",
            centroid[d],
            mean
        );
    }
}

#[tokio::test]
async fn test_validation_failure_creates_no_artifacts() {
    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store, Arc::new(FakeExecutor));

    let missing = artifacts.path().join("does-not-exist");
    let req = WorkspaceRequest {
        workspace_root: missing,
        workspace_id: "ws-test".to_string(),
        run_id: None,
    };
    let err = indexer.scan(&req, &CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("workspace root access"));

    // No run directory may exist for a rejected request.
    let entries: Vec<_> = fs::read_dir(artifacts.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("RUN-"))
        .collect();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_caller_supplied_run_id_is_used() {
    let ws = setup_workspace();
    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store, Arc::new(FakeExecutor));

    let mut req = request(&ws);
    req.run_id = Some("RUN-pinned".to_string());
    let report = indexer.scan(&req, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.run_id, "RUN-pinned");
    assert!(artifacts.path().join("RUN-pinned/files.ndjson").is_file());
    assert!(artifacts.path().join("RUN-pinned/dirs.ndjson").is_file());
}

#[tokio::test]
async fn test_binary_and_oversized_files_are_not_embedded() {
    let ws = setup_workspace();
    fs::write(ws.path().join("blob.bin"), b"GIF89a\x00\x00trailer").unwrap();
    let big = "x".repeat(300 * 1024);
    fs::write(ws.path().join("big.txt"), big).unwrap();

    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store, Arc::new(FakeExecutor));

    let report = indexer
        .embed(&request(&ws), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.acceptance, Some(Acceptance::Pass), "risks: {:?}", report.risks);

    let vectors_path = artifact_named(&report.artifact_paths, "vectors.ndjson").unwrap();
    let vectors = read_ndjson(&vectors_path);
    assert!(!vectors.iter().any(|v| v["relpath"] == "blob.bin"));
    assert!(!vectors.iter().any(|v| v["relpath"] == "big.txt"));
    assert!(vectors.iter().any(|v| v["relpath"] == "README.md"));
}

#[tokio::test]
async fn test_chunk_rows_cover_files_contiguously() {
    let ws = setup_workspace();
    let artifacts = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let indexer = build_indexer(artifacts.path(), store, Arc::new(FakeExecutor));

    let report = indexer
        .embed(&request(&ws), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.acceptance, Some(Acceptance::Pass), "risks: {:?}", report.risks);

    let vectors_path = artifact_named(&report.artifact_paths, "vectors.ndjson").unwrap();
    let vectors = read_ndjson(&vectors_path);

    let mut readme_rows: Vec<&serde_json::Value> = vectors
        .iter()
        .filter(|v| v["relpath"] == "README.md")
        .collect();
    readme_rows.sort_by_key(|v| v["index"].as_i64().unwrap());

    assert_eq!(readme_rows[0]["start"], 0);
    let total = "# Title\nBody text\n".len() as i64;
    assert_eq!(readme_rows.last().unwrap()["end"], total);
    for pair in readme_rows.windows(2) {
        assert_eq!(pair[0]["end"], pair[1]["start"]);
    }
}
