//! Text embedding collaborators used by duplicate detection.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text`. An empty vector means "no embedding available".
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Embedding service reached over HTTP: `POST {url}` with `{"input": ...}`.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: Client,
    url: String,
}

impl HttpEmbedder {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build embedding http client")?;
        Ok(Self { client, url: url.to_string() })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .json(&EmbedRequest { input: text })
            .send()
            .await
            .with_context(|| format!("embedding request to {} failed", self.url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("embedding service returned {status}"));
        }
        let body: EmbedResponse =
            response.json().await.context("failed to decode embedding response")?;
        if body.embedding.iter().any(|value| !value.is_finite()) {
            return Err(anyhow!("embedding contains non-finite values"));
        }
        Ok(body.embedding)
    }
}

/// Used when no embedding endpoint is configured; duplicate detection becomes a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}
