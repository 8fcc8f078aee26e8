use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error kinds produced by the document pipeline.
///
/// Extraction errors and configuration/argument errors are terminal. Backend
/// errors are absorbed by the fallback chains and only escape when every
/// strategy is exhausted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Schema validation failed: {0}")]
    SchemaValidationFailed(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl PipelineError {
    /// Stable snake_case name, used in attempt logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::UnsupportedFormat(_) => "unsupported_format",
            PipelineError::CorruptDocument(_) => "corrupt_document",
            PipelineError::InvalidConfig(_) => "invalid_config",
            PipelineError::InvalidArgument(_) => "invalid_argument",
            PipelineError::EmbeddingUnavailable(_) => "embedding_unavailable",
            PipelineError::BackendUnavailable(_) => "backend_unavailable",
            PipelineError::RateLimited(_) => "rate_limited",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::SchemaValidationFailed(_) => "schema_validation_failed",
            PipelineError::QuotaExceeded(_) => "quota_exceeded",
        }
    }

    /// Transient backend failures that are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::BackendUnavailable(_)
                | PipelineError::RateLimited(_)
                | PipelineError::Timeout(_)
                | PipelineError::EmbeddingUnavailable(_)
        )
    }

    /// Errors that are surfaced to the caller immediately, with no fallback.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineError::UnsupportedFormat(_)
                | PipelineError::CorruptDocument(_)
                | PipelineError::InvalidConfig(_)
                | PipelineError::InvalidArgument(_)
        )
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Pipeline(e) => match e {
                PipelineError::UnsupportedFormat(msg) => (
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    "UNSUPPORTED_FORMAT",
                    msg.clone(),
                ),
                PipelineError::CorruptDocument(msg) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "CORRUPT_DOCUMENT",
                    msg.clone(),
                ),
                PipelineError::InvalidArgument(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", msg.clone())
                }
                PipelineError::InvalidConfig(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_CONFIG", msg.clone())
                }
                other => {
                    tracing::error!("Pipeline error escaped fallback chain: {other}");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "BACKEND_ERROR",
                        "An AI processing error occurred".to_string(),
                    )
                }
            },
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
