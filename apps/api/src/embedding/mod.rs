//! Text embedding.
//!
//! `EmbeddingBackend` is a single-request client for one model. The
//! `EmbeddingProvider` wraps a backend with batching, the shared timeout and
//! retry policy, and output validation, so callers only ever see vectors of the
//! provider's fixed dimension or `EmbeddingUnavailable`.

pub mod hashing;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::models::document::EmbeddingVector;
use crate::retry::{call_with_policy, CallPolicy};

/// Batches in flight at once per `embed` call.
const MAX_CONCURRENT_BATCHES: usize = 4;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embeds one batch with a single request. Must return one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, PipelineError>;
}

#[derive(Clone)]
pub struct EmbeddingProvider {
    backend: Arc<dyn EmbeddingBackend>,
    policy: CallPolicy,
    batch_size: usize,
}

impl EmbeddingProvider {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, policy: CallPolicy, batch_size: usize) -> Self {
        Self {
            backend,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    pub fn id(&self) -> &str {
        self.backend.id()
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    /// Embeds `texts`, returning vectors in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let label = format!("embedding[{}]", self.backend.id());
        // Batch futures own their inputs; `embed` must stay `Send` inside spawned handlers
        let owned: Vec<Vec<String>> = texts.chunks(self.batch_size).map(<[String]>::to_vec).collect();
        let batches: Vec<Vec<EmbeddingVector>> = stream::iter(owned)
            .map(|batch| {
                let backend = Arc::clone(&self.backend);
                let policy = self.policy;
                let label = label.clone();
                async move {
                    call_with_policy(&policy, &label, || backend.embed_batch(&batch)).await
                }
            })
            .buffered(MAX_CONCURRENT_BATCHES)
            .try_collect()
            .await
            .map_err(|e| self.unavailable(e))?;

        let vectors: Vec<EmbeddingVector> = batches.into_iter().flatten().collect();
        if vectors.len() != texts.len() {
            return Err(PipelineError::EmbeddingUnavailable(format!(
                "{} returned {} vectors for {} inputs",
                self.backend.id(),
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            self.check_vector(vector)?;
        }

        debug!(
            "Embedded {} texts with {} (dim={})",
            texts.len(),
            self.backend.id(),
            self.dimension()
        );
        Ok(vectors)
    }

    pub async fn embed_query(&self, text: &str) -> Result<EmbeddingVector, PipelineError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            PipelineError::EmbeddingUnavailable(format!(
                "{} returned no vector for the query",
                self.backend.id()
            ))
        })
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), PipelineError> {
        if vector.len() != self.dimension() {
            return Err(PipelineError::EmbeddingUnavailable(format!(
                "{} returned a {}-dimensional vector, expected {}",
                self.backend.id(),
                vector.len(),
                self.dimension()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::EmbeddingUnavailable(format!(
                "{} returned a non-finite vector component",
                self.backend.id()
            )));
        }
        Ok(())
    }

    fn unavailable(&self, err: PipelineError) -> PipelineError {
        if err.is_terminal() || matches!(err, PipelineError::EmbeddingUnavailable(_)) {
            return err;
        }
        warn!("Embedding backend {} failed: {}", self.backend.id(), err);
        PipelineError::EmbeddingUnavailable(format!("{}: {}", self.backend.id(), err))
    }
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Scales `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}
