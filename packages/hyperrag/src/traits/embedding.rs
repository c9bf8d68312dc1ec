//! Embedding contract.

use async_trait::async_trait;

use crate::error::BoxError;

/// Batch text embedding provider with a fixed output dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed every text; the result has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BoxError>;

    /// Vector dimension (fixed per deployment).
    fn dimension(&self) -> usize;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for std::sync::Arc<T> {
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BoxError> {
        (**self).embed(texts).await
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }
}
