use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, LlmBackend};
use crate::errors::PipelineError;
use crate::http::{build_client, check_status, map_transport_error};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Google Gemini `generateContent`.
#[derive(Clone)]
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl GeminiBackend {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn id(&self) -> &str {
        "gemini"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, PipelineError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.prompt,
                }],
            }],
            system_instruction: (!request.system.is_empty()).then(|| Content {
                parts: vec![Part {
                    text: request.system,
                }],
            }),
            generation_config: GenerationConfig {
                temperature: request.options.temperature,
                max_output_tokens: request.options.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{GEMINI_API_BASE}/{}:generateContent", request.model))
            .query(&[("key", self.api_key.trim())])
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error("gemini", e, self.timeout))?;
        let response = check_status("gemini", response).await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error("gemini", e, self.timeout))?;
        debug!("Gemini call succeeded (model={})", request.model);

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(PipelineError::BackendUnavailable(
                "gemini returned no candidates".into(),
            ));
        }
        Ok(text)
    }
}
