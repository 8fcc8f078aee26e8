//! HTTP plumbing shared by the LLM and embedding backend clients.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use crate::errors::PipelineError;

const ERROR_SNIPPET_CHARS: usize = 300;

/// Builds a `reqwest` client with the given per-request timeout.
pub fn build_client(timeout: Duration) -> Result<Client, PipelineError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::InvalidConfig(format!("failed to build HTTP client: {e}")))
}

/// Passes successful responses through; maps error statuses to pipeline errors.
pub async fn check_status(backend: &str, response: Response) -> Result<Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(map_status(backend, status, &body))
}

/// 429 is a rate limit unless the body says the quota is gone; 402 and
/// quota-mentioning 403s are quota errors; everything else is an outage.
pub fn map_status(backend: &str, status: StatusCode, body: &str) -> PipelineError {
    let snippet: String = body.chars().take(ERROR_SNIPPET_CHARS).collect();
    let mentions_quota = {
        let lower = body.to_lowercase();
        lower.contains("quota") || lower.contains("billing") || lower.contains("credit")
    };
    let message = format!("{backend} returned {status}: {snippet}");

    match status {
        StatusCode::TOO_MANY_REQUESTS if mentions_quota => PipelineError::QuotaExceeded(message),
        StatusCode::TOO_MANY_REQUESTS => PipelineError::RateLimited(message),
        StatusCode::PAYMENT_REQUIRED => PipelineError::QuotaExceeded(message),
        StatusCode::FORBIDDEN if mentions_quota => PipelineError::QuotaExceeded(message),
        _ => PipelineError::BackendUnavailable(message),
    }
}

pub fn map_transport_error(backend: &str, err: reqwest::Error, timeout: Duration) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Timeout(timeout)
    } else if err.is_decode() {
        PipelineError::BackendUnavailable(format!("{backend} sent an unreadable response: {err}"))
    } else {
        PipelineError::BackendUnavailable(format!("{backend}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_is_rate_limited() {
        let err = map_status("openai", StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, PipelineError::RateLimited(_)));
    }

    #[test]
    fn test_429_with_quota_is_quota_exceeded() {
        let body = r#"{"error":{"code":"insufficient_quota"}}"#;
        let err = map_status("openai", StatusCode::TOO_MANY_REQUESTS, body);
        assert!(matches!(err, PipelineError::QuotaExceeded(_)));
    }

    #[test]
    fn test_402_and_quota_403() {
        assert!(matches!(
            map_status("gemini", StatusCode::PAYMENT_REQUIRED, ""),
            PipelineError::QuotaExceeded(_)
        ));
        assert!(matches!(
            map_status("gemini", StatusCode::FORBIDDEN, "Quota exceeded for project"),
            PipelineError::QuotaExceeded(_)
        ));
        assert!(matches!(
            map_status("gemini", StatusCode::FORBIDDEN, "invalid key"),
            PipelineError::BackendUnavailable(_)
        ));
    }

    #[test]
    fn test_server_error_is_unavailable() {
        let err = map_status("ollama", StatusCode::BAD_GATEWAY, "");
        assert!(matches!(err, PipelineError::BackendUnavailable(_)));
        assert!(err.to_string().contains("ollama"));
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "x".repeat(10_000);
        let err = map_status("anthropic", StatusCode::INTERNAL_SERVER_ERROR, &body);
        assert!(err.to_string().len() < 500);
    }
}
