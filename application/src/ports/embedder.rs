//! Embedding provider port
//!
//! The embedding model is an injected collaborator; the engine functions
//! without one (search degrades to substring matching).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("embedding failed: {0}")]
    Failed(String),
}

/// `embed` returns one vector per input text, all of equal dimensionality.
/// Implementations are synchronous: models are local, and callers may be on
/// interpreter threads.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Query-side embedding; retrieval models may prefix instructions here
    fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[query.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Failed("empty embedding batch".into()))
    }
}
