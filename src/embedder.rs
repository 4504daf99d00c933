//! Embedding clients.

use anyhow::Result;

pub mod ollama;

pub use ollama::OllamaEmbedder;

/// Turns text into fixed-dimension vectors.
pub trait Embedder {
    /// Model identifier.
    fn model(&self) -> &str;

    /// Dimension every returned vector is expected to have.
    fn dimension(&self) -> usize;

    /// Embeds a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embeds several texts, preserving order. Fails on the first error.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Embeds a search query.
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(query)
    }

    /// True when the model answers with vectors of the expected dimension.
    fn check_health(&self) -> bool {
        match self.embed("test") {
            Ok(vector) => vector.len() == self.dimension(),
            Err(err) => {
                tracing::error!(error = %err, model = self.model(), "embedding health check failed");
                false
            }
        }
    }
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        (**self).embed_query(query)
    }

    fn check_health(&self) -> bool {
        (**self).check_health()
    }
}
