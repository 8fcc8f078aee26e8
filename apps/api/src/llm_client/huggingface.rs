use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, LlmBackend};
use crate::errors::PipelineError;
use crate::http::{build_client, map_status, map_transport_error};

const HUGGINGFACE_API_URL: &str = "https://api-inference.huggingface.co/models";

#[derive(Debug, Serialize)]
struct GenerationRequest {
    inputs: String,
    parameters: GenerationParameters,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    max_new_tokens: u32,
    temperature: f32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
struct Generation {
    generated_text: String,
}

/// The Inference API answers either a list of generations or a single one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GenerationResponse {
    Many(Vec<Generation>),
    One(Generation),
}

impl GenerationResponse {
    fn into_text(self) -> Option<String> {
        let text = match self {
            GenerationResponse::Many(generations) => generations.into_iter().next()?.generated_text,
            GenerationResponse::One(generation) => generation.generated_text,
        };
        Some(text).filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct HuggingFaceError {
    error: String,
}

/// Hosted open models through the HuggingFace Inference API.
#[derive(Clone)]
pub struct HuggingFaceBackend {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl HuggingFaceBackend {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            timeout,
        })
    }
}

/// Text-generation models take one input string, so the system prompt leads it.
fn generation_input(system: &str, prompt: &str) -> String {
    if system.trim().is_empty() {
        prompt.to_string()
    } else {
        format!("{system}\n\n{prompt}")
    }
}

#[async_trait]
impl LlmBackend for HuggingFaceBackend {
    fn id(&self) -> &str {
        "huggingface"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, PipelineError> {
        let body = GenerationRequest {
            inputs: generation_input(request.system, request.prompt),
            parameters: GenerationParameters {
                max_new_tokens: request.options.max_tokens,
                temperature: request.options.temperature,
                return_full_text: false,
            },
        };

        let response = self
            .client
            .post(format!("{HUGGINGFACE_API_URL}/{}", request.model))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error("huggingface", e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<HuggingFaceError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(map_status("huggingface", status, &message));
        }

        let generation: GenerationResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error("huggingface", e, self.timeout))?;
        debug!("HuggingFace call to {} succeeded", request.model);

        generation.into_text().ok_or_else(|| {
            PipelineError::BackendUnavailable("huggingface returned empty content".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_takes_first_generation() {
        let raw = r#"[{"generated_text": "{\"contact\":{}}"}, {"generated_text": "ignored"}]"#;
        let response: GenerationResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.into_text().as_deref(), Some("{\"contact\":{}}"));
    }

    #[test]
    fn test_single_and_blank_responses() {
        let single: GenerationResponse =
            serde_json::from_str(r#"{"generated_text": "hello"}"#).unwrap();
        assert_eq!(single.into_text().as_deref(), Some("hello"));

        let blank: GenerationResponse = serde_json::from_str(r#"[{"generated_text": "  "}]"#).unwrap();
        assert!(blank.into_text().is_none());
        let empty: GenerationResponse = serde_json::from_str("[]").unwrap();
        assert!(empty.into_text().is_none());
    }

    #[test]
    fn test_system_prompt_leads_input() {
        assert_eq!(generation_input("Be terse.", "Parse this"), "Be terse.\n\nParse this");
        assert_eq!(generation_input("", "Parse this"), "Parse this");
    }

    #[tokio::test]
    async fn test_available_only_with_key() {
        let backend = HuggingFaceBackend::new(String::new(), Duration::from_secs(1)).unwrap();
        assert!(!backend.is_available().await);
        let backend = HuggingFaceBackend::new("hf_test".to_string(), Duration::from_secs(1)).unwrap();
        assert!(backend.is_available().await);
        assert_eq!(backend.id(), "huggingface");
    }
}
