use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, LlmBackend};
use crate::errors::PipelineError;
use crate::http::{build_client, check_status, map_transport_error};

/// Availability probes must not hold up a request for long.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const CONTEXT_WINDOW: u32 = 4096;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// A local Ollama server. Needs no API key.
#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Names of the models installed on the server.
    pub async fn installed_models(&self) -> Result<Vec<String>, PipelineError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| map_transport_error("ollama", e, PROBE_TIMEOUT))?;
        let response = check_status("ollama", response).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error("ollama", e, PROBE_TIMEOUT))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn id(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        match self.installed_models().await {
            Ok(models) => !models.is_empty(),
            Err(e) => {
                debug!("Ollama not available: {}", e);
                false
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, PipelineError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model: request.model,
                prompt: request.prompt,
                system: request.system,
                stream: false,
                options: GenerateOptions {
                    temperature: request.options.temperature,
                    num_predict: request.options.max_tokens,
                    num_ctx: CONTEXT_WINDOW,
                },
            })
            .send()
            .await
            .map_err(|e| map_transport_error("ollama", e, self.timeout))?;
        let response = check_status("ollama", response).await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error("ollama", e, self.timeout))?;
        debug!("Ollama call succeeded (model={})", request.model);
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // port 9 (discard) is never an Ollama server
        let backend = OllamaBackend::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        assert!(!backend.is_available().await);
    }

    #[test]
    fn test_empty_system_prompt_is_omitted() {
        let body = serde_json::to_value(GenerateRequest {
            model: "llama3.2:3b",
            prompt: "hi",
            system: "",
            stream: false,
            options: GenerateOptions {
                temperature: 0.1,
                num_predict: 16,
                num_ctx: CONTEXT_WINDOW,
            },
        })
        .unwrap();
        assert!(body.get("system").is_none());
        assert_eq!(body["stream"], false);
    }
}
