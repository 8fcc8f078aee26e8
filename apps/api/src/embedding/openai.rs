use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::EmbeddingBackend;
use crate::errors::PipelineError;
use crate::http::{build_client, check_status, map_transport_error};
use crate::models::document::EmbeddingVector;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
pub const DEFAULT_OPENAI_EMBED_DIMENSION: usize = 1536;

/// Embeddings from the OpenAI `/v1/embeddings` endpoint.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    dimension: usize,
    /// Sent as `dimensions` when the caller overrides the model's native size.
    requested_dimension: Option<usize>,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: EmbeddingVector,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: String,
        model: String,
        dimension: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "missing OpenAI API key".to_string(),
            ));
        }
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.trim().to_string(),
            model,
            dimension: dimension.unwrap_or(DEFAULT_OPENAI_EMBED_DIMENSION),
            requested_dimension: dimension,
            timeout,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    fn id(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, PipelineError> {
        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
                dimensions: self.requested_dimension,
            })
            .send()
            .await
            .map_err(|e| map_transport_error("openai", e, self.timeout))?;
        let response = check_status("openai", response).await?;
        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error("openai", e, self.timeout))?;
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}
