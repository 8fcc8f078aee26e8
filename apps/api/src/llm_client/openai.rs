use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, LlmBackend};
use crate::errors::PipelineError;
use crate::http::{build_client, check_status, map_transport_error};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// OpenAI Chat Completions.
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl OpenAiBackend {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn id(&self) -> &str {
        "openai"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, PipelineError> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt,
        });

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(self.api_key.trim())
            .json(&ChatRequest {
                model: request.model,
                messages,
                temperature: request.options.temperature,
                max_tokens: request.options.max_tokens,
            })
            .send()
            .await
            .map_err(|e| map_transport_error("openai", e, self.timeout))?;
        let response = check_status("openai", response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error("openai", e, self.timeout))?;
        debug!("OpenAI call succeeded (model={})", request.model);

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PipelineError::BackendUnavailable("openai returned no choices".into()))
    }
}
