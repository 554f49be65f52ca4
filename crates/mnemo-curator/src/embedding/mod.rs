//! Text embedding
//!
//! The pipeline only needs `embed(text) -> vector`. [`FastEmbedder`] runs the
//! multilingual E5 small model locally; tests use the hashed embedders in
//! [`crate::testing`].

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;

use crate::error::{CuratorError, Result};

/// Output dimension of the multilingual E5 small model
pub const EMBEDDING_DIMENSION: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector returned by `embed`
    fn dimension(&self) -> usize;
}

/// Local ONNX embedding model.
///
/// Inference is CPU-bound, so each call runs on the blocking pool. The model
/// needs `&mut self`; calls are serialised on one instance.
#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedder {
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(FastEmbedModel::MultilingualE5Small))
            .map_err(|e| CuratorError::Embedding(e.to_string()))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        let embeddings = tokio::task::spawn_blocking(move || model.lock().embed(vec![text], None))
            .await
            .map_err(|e| CuratorError::Embedding(format!("Embedding task failed: {e}")))?
            .map_err(|e| CuratorError::Embedding(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CuratorError::Embedding("No embedding returned".to_string()))
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("dimension", &EMBEDDING_DIMENSION)
            .finish()
    }
}

#[cfg(all(test, feature = "ml-tests"))]
mod tests {
    use super::*;
    use crate::text::cosine_similarity;

    #[tokio::test]
    async fn test_embed_returns_correct_dimension() {
        let embedder = FastEmbedder::new().expect("Failed to load model");
        let embedding = embedder.embed("Hello, world!").await.expect("Failed to embed");
        assert_eq!(embedding.len(), EMBEDDING_DIMENSION);
    }

    #[tokio::test]
    async fn test_similar_texts_have_high_similarity() {
        let embedder = FastEmbedder::new().expect("Failed to load model");

        let emb1 = embedder.embed("The quick brown fox jumps over the lazy dog").await.unwrap();
        let emb2 = embedder.embed("A fast brown fox leaps over a sleepy dog").await.unwrap();
        let emb3 = embedder.embed("Quantum computing revolutionizes cryptography").await.unwrap();

        let sim_similar = cosine_similarity(&emb1, &emb2);
        let sim_different = cosine_similarity(&emb1, &emb3);
        assert!(
            sim_similar > sim_different,
            "Similar texts ({sim_similar:.3}) should score above different texts ({sim_different:.3})"
        );
    }
}
