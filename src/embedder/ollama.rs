//! Ollama embedding client (`/api/embeddings`).

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::config::OllamaSettings;
use crate::http::{error_body, is_retryable_error, retry_backoff, should_retry};

/// Blocking embeddings client that talks to a local Ollama daemon.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    max_retries: usize,
    retry_base: Duration,
}

impl OllamaEmbedder {
    /// Builds a new Ollama embeddings client.
    pub fn new(
        base_url: &str,
        model: String,
        dimension: usize,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "Ollama base URL must be an http(s) URL"
        );
        anyhow::ensure!(!model.trim().is_empty(), "missing Ollama embedding model name");
        anyhow::ensure!(dimension > 0, "embedding dimension must be positive");
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Ollama HTTP client")?;
        let endpoint = format!("{}/api/embeddings", base_url.trim_end_matches('/'));
        tracing::info!(model = %model, endpoint = %endpoint, "initialized Ollama embedder");
        Ok(Self {
            client,
            endpoint,
            model,
            dimension,
            max_retries: max_retries.max(1),
            retry_base: Duration::from_millis(500),
        })
    }

    /// Builds a client from the shared settings.
    pub fn from_settings(settings: &OllamaSettings) -> Result<Self> {
        Self::new(
            &settings.base_url,
            settings.embedding_model.clone(),
            settings.embedding_dimension,
            settings.timeout(),
            settings.max_retries,
        )
    }

    /// Overrides the base delay between retries (doubles per attempt).
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                prompt: text,
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp
                            .json()
                            .context("failed to parse Ollama embedding response")?;
                        anyhow::ensure!(
                            !parsed.embedding.is_empty(),
                            "Ollama returned an empty embedding for model {}",
                            self.model
                        );
                        return Ok(parsed.embedding);
                    }

                    let body = error_body(resp);
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(%status, attempt, "retrying Ollama embedding request");
                        thread::sleep(retry_backoff(self.retry_base, attempt));
                        continue;
                    }
                    anyhow::bail!("Ollama embeddings request failed ({}): {}", status, body);
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(error = %err, attempt, "retrying Ollama embedding request");
                        thread::sleep(retry_backoff(self.retry_base, attempt));
                        continue;
                    }
                    return Err(anyhow::Error::new(err)
                        .context(format!("failed to call Ollama at {}", self.endpoint)));
                }
            }
        }
    }
}

impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.request_embedding(text)?;
        if embedding.len() != self.dimension {
            tracing::warn!(
                got = embedding.len(),
                expected = self.dimension,
                model = %self.model,
                "unexpected embedding dimension"
            );
        }
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for (idx, text) in texts.iter().enumerate() {
            let vector = self
                .embed(text)
                .with_context(|| format!("failed to embed text at index {idx}"))?;
            embeddings.push(vector);
        }
        tracing::debug!(count = embeddings.len(), "generated embeddings");
        Ok(embeddings)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}
