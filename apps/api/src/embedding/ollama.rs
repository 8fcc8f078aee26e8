use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::EmbeddingBackend;
use crate::errors::PipelineError;
use crate::http::{build_client, check_status, map_transport_error};
use crate::models::document::EmbeddingVector;

pub const DEFAULT_OLLAMA_EMBED_DIMENSION: usize = 768;

/// Embeddings from a local Ollama server via `POST /api/embed`.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<EmbeddingVector>,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: &str,
        model: String,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        if model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "missing Ollama embedding model name".to_string(),
            ));
        }
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model,
            dimension,
            timeout,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn id(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, PipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| map_transport_error("ollama", e, self.timeout))?;
        let response = check_status("ollama", response).await?;
        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error("ollama", e, self.timeout))?;
        Ok(parsed.embeddings)
    }
}
