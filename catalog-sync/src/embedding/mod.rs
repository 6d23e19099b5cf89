//! Embedding generation for catalog records and retrieval queries
//!
//! Providers turn text into a fixed-length vector. [`RetryingEmbedder`]
//! wraps any provider with a bounded exponential backoff that only retries
//! transient failures.

pub mod gemini;
pub mod local;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;

pub use gemini::{GeminiConfig, GeminiEmbedder};
pub use local::FastEmbedProvider;
pub use retry::{RetryPolicy, RetryingEmbedder};

/// Text to vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed one catalog text for storage
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed a retrieval query
    ///
    /// Same as [`embed`](Self::embed) unless the model encodes queries and
    /// documents differently.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed(query).await
    }
}

#[async_trait]
impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<P> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        (**self).embed(text).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ProviderError> {
        (**self).embed_query(query).await
    }
}

/// Reject vectors whose length differs from the provider's dimension
pub(crate) fn check_dimension(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, ProviderError> {
    if vector.len() != expected {
        return Err(ProviderError::Permanent(format!(
            "expected {}-dimensional embedding, got {}",
            expected,
            vector.len()
        )));
    }
    Ok(vector)
}
