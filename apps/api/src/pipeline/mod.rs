//! Pipeline wiring: builds the orchestrator from configuration and exposes it
//! over HTTP.

pub mod handlers;
pub mod orchestrator;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{BackendsConfig, Config, EmbeddingBackendKind, PipelineConfig};
use crate::db::create_pool;
use crate::embedding::hashing::{HashingEmbedder, DEFAULT_HASHING_DIMENSION};
use crate::embedding::ollama::{OllamaEmbedder, DEFAULT_OLLAMA_EMBED_DIMENSION};
use crate::embedding::openai::OpenAiEmbedder;
use crate::embedding::{EmbeddingBackend, EmbeddingProvider};
use crate::extract::DocumentTextExtractor;
use crate::llm_client::anthropic::AnthropicBackend;
use crate::llm_client::huggingface::HuggingFaceBackend;
use crate::llm_client::gemini::GeminiBackend;
use crate::llm_client::ollama::OllamaBackend;
use crate::llm_client::openai::OpenAiBackend;
use crate::llm_client::BackendRegistry;
use crate::rag::index::{MemoryIndex, VectorIndex};
use crate::rag::pgvector::PgVectorIndex;

pub use orchestrator::Orchestrator;

/// Builds the orchestrator with every backend the configuration enables.
pub async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let pipeline = &config.pipeline;
    let backends = build_backends(&config.backends, pipeline)?;
    let embedder = build_embedder(&config.backends, pipeline)?;

    let dimension = embedder
        .as_ref()
        .map(|e| e.dimension())
        .or(config.backends.embedding_dimension)
        .unwrap_or(DEFAULT_HASHING_DIMENSION);
    let index: Arc<dyn VectorIndex> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            Arc::new(
                PgVectorIndex::connect(pool, dimension)
                    .await
                    .context("failed to prepare the pgvector index")?,
            )
        }
        None => Arc::new(MemoryIndex::new(dimension)),
    };
    info!("Vector index: {} ({} dimensions)", index.kind(), dimension);

    let orchestrator = Orchestrator::new(
        pipeline,
        Arc::new(DocumentTextExtractor),
        embedder,
        index,
        backends,
    )?;
    Ok(orchestrator)
}

fn build_backends(config: &BackendsConfig, pipeline: &PipelineConfig) -> Result<BackendRegistry> {
    let timeout = pipeline.backend_timeout;
    let mut registry = BackendRegistry::new();

    if let Some(url) = &config.ollama_url {
        registry.register(Arc::new(OllamaBackend::new(url, timeout)?));
        info!("LLM backend registered: ollama ({url})");
    }
    if let Some(key) = &config.openai_api_key {
        registry.register(Arc::new(OpenAiBackend::new(key.clone(), timeout)?));
        info!("LLM backend registered: openai");
    }
    if let Some(key) = &config.gemini_api_key {
        registry.register(Arc::new(GeminiBackend::new(key.clone(), timeout)?));
        info!("LLM backend registered: gemini");
    }
    if let Some(key) = &config.anthropic_api_key {
        registry.register(Arc::new(AnthropicBackend::new(key.clone(), timeout)?));
        info!("LLM backend registered: anthropic");
    }
    if let Some(key) = &config.huggingface_api_key {
        registry.register(Arc::new(HuggingFaceBackend::new(key.clone(), timeout)?));
        info!("LLM backend registered: huggingface");
    }
    if registry.is_empty() {
        info!("No LLM backend configured; extraction will use offline heuristics");
    }
    Ok(registry)
}

fn build_embedder(
    config: &BackendsConfig,
    pipeline: &PipelineConfig,
) -> Result<Option<EmbeddingProvider>> {
    let timeout = pipeline.backend_timeout;
    let backend: Arc<dyn EmbeddingBackend> = match config.embedding_backend {
        EmbeddingBackendKind::Disabled => {
            info!("Embeddings disabled; retrieval will use keyword search");
            return Ok(None);
        }
        EmbeddingBackendKind::Hashing => Arc::new(HashingEmbedder::new(
            config
                .embedding_dimension
                .unwrap_or(DEFAULT_HASHING_DIMENSION),
        )?),
        EmbeddingBackendKind::Ollama => {
            let url = config
                .ollama_url
                .as_deref()
                .context("EMBEDDING_BACKEND=ollama requires OLLAMA_URL")?;
            Arc::new(OllamaEmbedder::new(
                url,
                config.ollama_embed_model.clone(),
                config
                    .embedding_dimension
                    .unwrap_or(DEFAULT_OLLAMA_EMBED_DIMENSION),
                timeout,
            )?)
        }
        EmbeddingBackendKind::OpenAi => {
            let key = config
                .openai_api_key
                .clone()
                .context("EMBEDDING_BACKEND=openai requires OPENAI_API_KEY")?;
            Arc::new(OpenAiEmbedder::new(
                key,
                config.openai_embed_model.clone(),
                config.embedding_dimension,
                timeout,
            )?)
        }
    };

    info!(
        "Embedding backend: {} ({} dimensions)",
        backend.id(),
        backend.dimension()
    );
    Ok(Some(EmbeddingProvider::new(
        backend,
        pipeline.call_policy(),
        pipeline.embedding_batch_size,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> Config {
        Config {
            port: 0,
            rust_log: "info".to_string(),
            max_upload_bytes: 1024 * 1024,
            database_url: None,
            backends: BackendsConfig {
                ollama_url: None,
                ..BackendsConfig::default()
            },
            pipeline: PipelineConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_build_offline_orchestrator() {
        let orchestrator = build_orchestrator(&offline_config()).await.unwrap();
        let status = orchestrator.status().await;
        assert!(status.llm.is_empty());
        assert_eq!(status.embedding.map(|e| e.dimension), Some(384));
        assert_eq!(status.index_kind, "memory");
    }

    #[tokio::test]
    async fn test_build_with_disabled_embeddings() {
        let mut config = offline_config();
        config.backends.embedding_backend = EmbeddingBackendKind::Disabled;
        let orchestrator = build_orchestrator(&config).await.unwrap();
        assert!(orchestrator.status().await.embedding.is_none());
    }

    #[tokio::test]
    async fn test_ollama_embeddings_require_url() {
        let mut config = offline_config();
        config.backends.embedding_backend = EmbeddingBackendKind::Ollama;
        assert!(build_orchestrator(&config).await.is_err());
    }

    #[test]
    fn test_cloud_backends_register_when_keys_present() {
        let config = BackendsConfig {
            ollama_url: None,
            openai_api_key: Some("sk-test".to_string()),
            anthropic_api_key: Some("sk-ant-test".to_string()),
            huggingface_api_key: Some("hf_test".to_string()),
            ..BackendsConfig::default()
        };
        let registry = build_backends(&config, &PipelineConfig::default()).unwrap();
        assert!(registry.get("openai").is_some());
        assert!(registry.get("anthropic").is_some());
        assert!(registry.get("huggingface").is_some());
        assert!(registry.get("gemini").is_none());
    }
}
