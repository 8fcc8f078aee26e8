use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::errors::PipelineError;
use crate::extraction::selector::{parse_catalog, parse_thresholds, SelectionConfig};
use crate::llm_client::CompletionOptions;
use crate::rag::chunker::ChunkStrategy;
use crate::retry::CallPolicy;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Application configuration loaded from environment variables.
/// Built once at startup; pipeline components receive the pieces they need.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub max_upload_bytes: usize,
    /// Enables the pgvector-backed index when set.
    pub database_url: Option<String>,
    pub backends: BackendsConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackendKind {
    Hashing,
    Ollama,
    OpenAi,
    Disabled,
}

impl FromStr for EmbeddingBackendKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashing" | "local" => Ok(EmbeddingBackendKind::Hashing),
            "ollama" => Ok(EmbeddingBackendKind::Ollama),
            "openai" => Ok(EmbeddingBackendKind::OpenAi),
            "none" | "disabled" | "off" => Ok(EmbeddingBackendKind::Disabled),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown EMBEDDING_BACKEND '{other}'"
            ))),
        }
    }
}

/// Credentials and endpoints for the optional AI backends.
#[derive(Debug, Clone)]
pub struct BackendsConfig {
    pub ollama_url: Option<String>,
    pub ollama_embed_model: String,
    pub openai_api_key: Option<String>,
    pub openai_embed_model: String,
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub huggingface_api_key: Option<String>,
    pub embedding_backend: EmbeddingBackendKind,
    /// Overrides the backend's native embedding dimension.
    pub embedding_dimension: Option<usize>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            ollama_url: Some(DEFAULT_OLLAMA_URL.to_string()),
            ollama_embed_model: "nomic-embed-text".to_string(),
            openai_api_key: None,
            openai_embed_model: "text-embedding-3-small".to_string(),
            gemini_api_key: None,
            anthropic_api_key: None,
            huggingface_api_key: None,
            embedding_backend: EmbeddingBackendKind::Hashing,
            embedding_dimension: None,
        }
    }
}

/// Tunables for chunking, retrieval, backend calls and model selection.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_strategy: ChunkStrategy,
    /// Section and page pieces shorter than this are merged with a neighbour.
    pub min_chunk_size: usize,
    pub rag_top_k: usize,
    pub backend_timeout: Duration,
    pub backend_retries: u32,
    pub retry_backoff: Duration,
    pub embedding_batch_size: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub answer_temperature: f32,
    pub selection: SelectionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 300,
            chunk_overlap: 100,
            chunk_strategy: ChunkStrategy::SlidingWindow,
            min_chunk_size: 100,
            rag_top_k: 5,
            backend_timeout: Duration::from_secs(30),
            backend_retries: 1,
            retry_backoff: Duration::from_millis(500),
            embedding_batch_size: 32,
            max_tokens: 2048,
            temperature: 0.1,
            answer_temperature: 0.2,
            selection: SelectionConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.rag_top_k == 0 {
            return Err(PipelineError::InvalidConfig(
                "rag_top_k must be greater than 0".to_string(),
            ));
        }
        if self.embedding_batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "embedding_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.backend_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "backend_timeout must be greater than 0".to_string(),
            ));
        }
        self.selection.validate()
    }

    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: self.backend_timeout,
            retries: self.backend_retries,
            backoff: self.retry_backoff,
        }
    }

    pub fn extraction_options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    pub fn answer_options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.max_tokens,
            temperature: self.answer_temperature,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = PipelineConfig::default();
        let mut selection = SelectionConfig::default();
        if let Some(raw) = optional_env("MODEL_CATALOG") {
            selection.catalog = parse_catalog(&raw).context("MODEL_CATALOG is malformed")?;
        }
        if let Some(raw) = optional_env("MODEL_THRESHOLDS") {
            selection.thresholds =
                parse_thresholds(&raw).context("MODEL_THRESHOLDS is malformed")?;
        }
        if let Some(raw) = optional_env("BACKEND_PRIORITY") {
            selection.backend_priority = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        let pipeline = PipelineConfig {
            chunk_size: env_or("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: env_or("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            chunk_strategy: optional_env("CHUNK_STRATEGY")
                .map(|v| v.parse::<ChunkStrategy>())
                .transpose()?
                .unwrap_or(defaults.chunk_strategy),
            min_chunk_size: env_or("MIN_CHUNK_SIZE", defaults.min_chunk_size)?,
            rag_top_k: env_or("RAG_TOP_K", defaults.rag_top_k)?,
            backend_timeout: Duration::from_secs(env_or(
                "BACKEND_TIMEOUT_SECS",
                defaults.backend_timeout.as_secs(),
            )?),
            backend_retries: env_or("BACKEND_RETRIES", defaults.backend_retries)?,
            retry_backoff: Duration::from_millis(env_or(
                "RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
            embedding_batch_size: env_or("EMBEDDING_BATCH_SIZE", defaults.embedding_batch_size)?,
            max_tokens: env_or("LLM_MAX_TOKENS", defaults.max_tokens)?,
            temperature: env_or("LLM_TEMPERATURE", defaults.temperature)?,
            answer_temperature: env_or("ANSWER_TEMPERATURE", defaults.answer_temperature)?,
            selection,
        };
        pipeline
            .validate()
            .context("pipeline configuration is invalid")?;

        let backend_defaults = BackendsConfig::default();
        let backends = BackendsConfig {
            ollama_url: match std::env::var("OLLAMA_URL") {
                Ok(v) if v.trim().is_empty() => None, // explicitly disabled
                Ok(v) => Some(v.trim().trim_end_matches('/').to_string()),
                Err(_) => backend_defaults.ollama_url,
            },
            ollama_embed_model: optional_env("OLLAMA_EMBED_MODEL")
                .unwrap_or(backend_defaults.ollama_embed_model),
            openai_api_key: optional_env("OPENAI_API_KEY"),
            openai_embed_model: optional_env("OPENAI_EMBED_MODEL")
                .unwrap_or(backend_defaults.openai_embed_model),
            gemini_api_key: optional_env("GOOGLE_GEMINI_API_KEY"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            huggingface_api_key: optional_env("HUGGINGFACE_API_KEY"),
            embedding_backend: optional_env("EMBEDDING_BACKEND")
                .map(|v| v.parse::<EmbeddingBackendKind>())
                .transpose()?
                .unwrap_or(backend_defaults.embedding_backend),
            embedding_dimension: optional_env("EMBEDDING_DIMENSION")
                .map(|v| {
                    v.parse::<usize>()
                        .context("EMBEDDING_DIMENSION must be a positive integer")
                })
                .transpose()?,
        };

        Ok(Config {
            port: env_or("PORT", 8080u16).context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?,
            database_url: optional_env("DATABASE_URL"),
            backends,
            pipeline,
        })
    }
}

/// Returns the variable's value, treating unset and blank the same.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
