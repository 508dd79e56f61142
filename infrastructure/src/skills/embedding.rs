//! Embedding utilities
//!
//! Cosine similarity, the content hash used as the embedding cache key, and
//! a deterministic hashing embedder. The hashing embedder projects token
//! counts into a fixed-size vector: no model weights, stable across
//! processes, good enough for ranking tests and offline deployments. Real
//! deployments inject a model-backed [`EmbeddingProvider`] instead.

use codemode_application::{EmbeddingError, EmbeddingProvider};
use sha2::{Digest, Sha256};

/// Cosine similarity of two equal-length vectors; 0.0 when degenerate
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cache key for a skill's embedding; changes whenever the description or
/// source changes.
pub fn content_hash(description: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// FNV-1a; the std hasher is randomly keyed per process, which would make
// cached vectors unstable across restarts.
fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Deterministic bag-of-tokens embedder
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let index = (fnv1a(token) % self.dims as u64) as usize;
            vector[index] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_content_hash_changes_with_source() {
        let a = content_hash("desc", "function run() end");
        let b = content_hash("desc", "function run() return 1 end");
        let c = content_hash("other", "function run() end");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, content_hash("desc", "function run() end"));
    }

    #[test]
    fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed(&["fetch json from url".into()]).unwrap();
        let b = embedder.embed(&["fetch json from url".into()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_embedder_ranks_related_text_higher() {
        let embedder = HashEmbedder::default();
        let vectors = embedder
            .embed(&[
                "fetch json from a url".into(),
                "fetch json payload from url endpoints".into(),
                "scan network ports with nmap".into(),
            ])
            .unwrap();
        let related = cosine_similarity(&vectors[0], &vectors[1]);
        let unrelated = cosine_similarity(&vectors[0], &vectors[2]);
        assert!(related > unrelated);
    }
}
