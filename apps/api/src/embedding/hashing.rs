use async_trait::async_trait;

use super::{l2_normalize, EmbeddingBackend};
use crate::errors::PipelineError;
use crate::models::document::EmbeddingVector;

pub const DEFAULT_HASHING_DIMENSION: usize = 384;

const BIGRAM_WEIGHT: f32 = 0.5;

/// Local embedder using the hashing trick over unigrams and bigrams.
///
/// Deterministic and dependency-free, so the pipeline keeps semantic-ish
/// retrieval with no model server. Shared vocabulary drives similarity.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, PipelineError> {
        if dimension == 0 {
            return Err(PipelineError::InvalidConfig(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    pub fn embed_text(&self, text: &str) -> EmbeddingVector {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();

        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        l2_normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let slot = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingBackend for HashingEmbedder {
    fn id(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, PipelineError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes.iter().fold(OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let a = embedder.embed_text("Senior Rust engineer");
        let b = embedder.embed_text("Senior Rust engineer");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let embedder = HashingEmbedder::new(384).unwrap();
        let query = embedder.embed_text("How many years of Python experience?");
        let related = embedder.embed_text("5 years of Python experience building APIs");
        let unrelated = embedder.embed_text("Bachelor of Arts in medieval history");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_case_insensitive() {
        let embedder = HashingEmbedder::new(128).unwrap();
        assert_eq!(embedder.embed_text("PYTHON"), embedder.embed_text("python"));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16).unwrap();
        assert!(embedder.embed_text("  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }
}
