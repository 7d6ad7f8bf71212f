//! Embedding provider abstraction
//!
//! A provider turns text into fixed-dimension vectors by calling some external
//! service. Providers know nothing about caching, fallback vectors or
//! normalisation; the cache layers those on top.

use crate::error::RouterResult;
use async_trait::async_trait;

/// Text to vector adapter for dependency injection and testing
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name used in logs and errors (e.g. "openai")
    fn name(&self) -> &str;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> RouterResult<Vec<f32>>;

    /// Embed several texts; the result is in the same order as the input.
    ///
    /// The default issues one `embed` call per text.
    async fn embed_batch(&self, texts: &[String]) -> RouterResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
