use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration for the indexing pipeline.
///
/// Loaded from TOML; store credentials and executor settings can be
/// overridden through `WSIDX_*` environment variables.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_root")]
    pub root: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
        }
    }
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("var/artifacts")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub ns: String,
    #[serde(default)]
    pub db: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: String::new(),
            pass: String::new(),
            ns: String::new(),
            db: String::new(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_store_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub model: String,
    /// Digest of the model weights, recorded on every vector row.
    #[serde(default)]
    pub model_sha: String,
    /// Provenance for upstream dimensionality reduction; 0 means none.
    #[serde(default)]
    pub effective_dim: usize,
    #[serde(default)]
    pub transform_id: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    /// Files larger than this are never embedded.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: String::new(),
            model_sha: String::new(),
            effective_dim: 0,
            transform_id: String::new(),
            batch_size: default_batch_size(),
            timeout_secs: default_embed_timeout_secs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_batch_size() -> usize {
    16
}
fn default_embed_timeout_secs() -> u64 {
    120
}
fn default_max_file_bytes() -> u64 {
    256 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_chunk: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            tokenizer: default_tokenizer(),
            max_tokens_per_chunk: default_max_tokens(),
        }
    }
}

fn default_tokenizer() -> String {
    "cl100k_base".to_string()
}
fn default_max_tokens() -> usize {
    crate::chunker::DEFAULT_MAX_TOKENS_PER_CHUNK
}

/// Read, override, and validate configuration.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    let set = |dst: &mut String, env: &str| {
        if let Ok(v) = std::env::var(env) {
            let v = v.trim();
            if !v.is_empty() {
                *dst = v.to_string();
            }
        }
    };

    set(&mut config.store.url, "WSIDX_STORE_URL");
    set(&mut config.store.user, "WSIDX_STORE_USER");
    set(&mut config.store.pass, "WSIDX_STORE_PASS");
    set(&mut config.store.ns, "WSIDX_STORE_NS");
    set(&mut config.store.db, "WSIDX_STORE_DB");

    set(&mut config.embedding.endpoint, "WSIDX_EMBED_URL");
    set(&mut config.embedding.model, "WSIDX_EMBED_MODEL");
    set(&mut config.embedding.model_sha, "WSIDX_EMBED_MODEL_SHA");
    set(&mut config.embedding.transform_id, "WSIDX_TRANSFORM_ID");
    set(&mut config.chunking.tokenizer, "WSIDX_TOKENIZER");

    if let Ok(v) = std::env::var("WSIDX_EFFECTIVE_DIM") {
        if let Ok(dim) = v.trim().parse::<usize>() {
            config.embedding.effective_dim = dim;
        }
    }
    if let Ok(v) = std::env::var("WSIDX_ARTIFACT_ROOT") {
        let v = v.trim();
        if !v.is_empty() {
            config.artifacts.root = PathBuf::from(v);
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.store.url.trim().is_empty() {
        anyhow::bail!("store.url must be set");
    }
    if config.store.ns.trim().is_empty() || config.store.db.trim().is_empty() {
        anyhow::bail!("store.ns and store.db must be set");
    }
    if config.embedding.endpoint.trim().is_empty() {
        anyhow::bail!("embedding.endpoint must be set");
    }
    if config.embedding.model.trim().is_empty() {
        anyhow::bail!("embedding.model must be set");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.chunking.max_tokens_per_chunk == 0 {
        anyhow::bail!("chunking.max_tokens_per_chunk must be > 0");
    }
    Ok(())
}
