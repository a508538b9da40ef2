//! Embedding collaborator and vector math
//!
//! Embeddings come from an external model. The engine only needs text in and
//! a fixed-width vector out, plus the similarity helpers shared by the LSH
//! index, the write gate and the ranker.

use async_trait::async_trait;
use ndarray::ArrayView1;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Cannot embed input: {0}")]
    InvalidInput(String),

    /// Transient; callers fall back to exact-key dedup
    #[error("Embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding width {got} does not match the index width {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Text to fixed-width vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Width of every vector this provider returns
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Embed several texts; stops at the first failure
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Deterministic provider for tests and demos.
///
/// Seeds a small PRNG with the xxh3 hash of the text, so equal texts always
/// map to the same unit vector. Can be switched off to exercise the
/// exact-key fallback.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    online: AtomicBool,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        info!("Mock embedding provider ready: {} dimensions", dimensions);
        Self {
            dimensions,
            online: AtomicBool::new(true),
        }
    }

    /// A provider that fails until switched back on
    pub fn unavailable(dimensions: usize) -> Self {
        let provider = Self::new(dimensions);
        provider.set_available(false);
        provider
    }

    pub fn set_available(&self, available: bool) {
        self.online.store(available, Ordering::SeqCst);
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        // xorshift64*, seeded from the text hash; zero is not a valid state
        let mut state = xxh3_64(text.as_bytes()) | 1;
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|_| {
                state ^= state >> 12;
                state ^= state << 25;
                state ^= state >> 27;
                let bits = state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 40;
                (bits as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
            })
            .collect();
        normalize_vector(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-xxh3"
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Unavailable("mock provider offline".into()));
        }
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("blank text".into()));
        }
        debug!("Mock embedding for {} bytes", text.len());
        Ok(self.vector_for(text))
    }
}

// ============== Vector Math ==============

/// Scale `v` to unit length; the zero vector is left alone
pub fn normalize_vector(v: &mut [f32]) {
    let norm = ArrayView1::from(&*v).dot(&ArrayView1::from(&*v)).sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Dot product; 0.0 when the widths differ
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    ArrayView1::from(a).dot(&ArrayView1::from(b))
}

/// Cosine in [-1, 1]; 0.0 when the widths differ or either side is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let norms = dot_product(a, a).sqrt() * dot_product(b, b).sqrt();
    if norms == 0.0 {
        0.0
    } else {
        dot_product(a, b) / norms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_cosine() {
        assert!(close(cosine_similarity(&[2.0, 0.0], &[5.0, 0.0]), 1.0));
        assert!(close(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]), 0.0));
        assert!(close(cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]), -1.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_dot_and_normalize() {
        assert!(close(dot_product(&[1.0, -2.0, 0.5], &[2.0, 1.0, 4.0]), 2.0));

        let mut v = vec![0.0, 5.0, 12.0];
        normalize_vector(&mut v);
        assert!(close(v[1], 5.0 / 13.0));
        assert!(close(v[2], 12.0 / 13.0));

        let mut zero = vec![0.0; 3];
        normalize_vector(&mut zero);
        assert_eq!(zero, vec![0.0; 3]);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic_unit() {
        let provider = MockEmbeddingProvider::new(32);
        let a = provider.embed("favorite_color: blue").await.unwrap();
        assert_eq!(a.len(), 32);
        assert!(close(dot_product(&a, &a), 1.0));

        assert_eq!(a, provider.embed("favorite_color: blue").await.unwrap());
        assert_ne!(a, provider.embed("favorite_color: red").await.unwrap());
        assert!(matches!(
            provider.embed("   ").await,
            Err(EmbeddingError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_batch_and_outage() {
        let provider = MockEmbeddingProvider::unavailable(8);
        let texts = vec!["one".to_string(), "two".to_string()];
        assert!(matches!(
            provider.embed_batch(&texts).await,
            Err(EmbeddingError::Unavailable(_))
        ));

        provider.set_available(true);
        let batch = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], provider.embed("two").await.unwrap());
    }
}
