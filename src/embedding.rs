//! Embedding executor abstraction and HTTP client.
//!
//! The executor accepts `{model, input: [text, …]}` and must return one
//! floating-point vector per input, in order. A count mismatch or a
//! non-success status is a hard failure of the calling batch; empty vectors
//! are rejected further up where the offending file is known.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// A batch embedding backend.
#[async_trait]
pub trait EmbeddingExecutor: Send + Sync {
    /// The model identifier sent with every request.
    fn model(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// HTTP client for an embedding executor endpoint.
pub struct HttpEmbedder {
    endpoint: String,
    model: String,
    http: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build embed http client")?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedRow>,
}

#[derive(Debug, Deserialize)]
struct EmbedRow {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingExecutor for HttpEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            inputs = inputs.len(),
            "embedding request"
        );

        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .context("embed http request")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("embed http {}: {}", status.as_u16(), detail.trim());
        }

        let decoded: EmbedResponse = response
            .json()
            .await
            .context("decode embed response")?;
        if decoded.data.len() != inputs.len() {
            bail!(
                "embed response count mismatch: expected {} got {}",
                inputs.len(),
                decoded.data.len()
            );
        }
        Ok(decoded.data.into_iter().map(|row| row.embedding).collect())
    }
}
