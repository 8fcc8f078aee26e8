use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, LlmBackend};
use crate::errors::PipelineError;
use crate::http::{build_client, map_status, map_transport_error};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Claude via the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl AnthropicBackend {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, PipelineError> {
        let request_body = AnthropicRequest {
            model: request.model,
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
            system: request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: request.prompt,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| map_transport_error("anthropic", e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Prefer the structured error message when there is one
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(map_status("anthropic", status, &message));
        }

        let llm_response: LlmResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error("anthropic", e, self.timeout))?;

        debug!(
            "Anthropic call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );

        llm_response
            .text()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::BackendUnavailable("anthropic returned empty content".into()))
    }
}
