//! LLM backends: the only place that talks to text-generation services.
//!
//! Every backend implements `LlmBackend` and makes exactly one HTTP request
//! per `complete` call. Timeouts, retries and fallbacks are the caller's job
//! (see `retry::call_with_policy` and the extraction strategy list), so a
//! backend never sleeps or loops.
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::errors::PipelineError;

pub mod anthropic;
pub mod gemini;
pub mod huggingface;
pub mod ollama;
pub mod openai;
pub mod prompts;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.1,
        }
    }
}

/// One generation request against a specific model.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub prompt: &'a str,
    pub options: CompletionOptions,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stable identifier used in configuration and provenance ("ollama", "openai", ...).
    fn id(&self) -> &str;

    /// Local backends need no API key and cost nothing per call.
    fn is_local(&self) -> bool {
        false
    }

    /// Cheap reachability/credential check. Never errors.
    async fn is_available(&self) -> bool;

    /// Returns the raw text of the model's reply.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, PipelineError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub local: bool,
    pub available: bool,
}

/// The configured LLM backends, in registration order.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn LlmBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn LlmBackend>) {
        self.backends.retain(|b| b.id() != backend.id());
        self.backends.push(backend);
    }

    pub fn with(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LlmBackend>> {
        self.backends.iter().find(|b| b.id() == id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Probes every backend concurrently.
    pub async fn status(&self) -> Vec<BackendStatus> {
        let probes = self.backends.iter().map(|b| async move {
            BackendStatus {
                id: b.id().to_string(),
                local: b.is_local(),
                available: b.is_available().await,
            }
        });
        join_all(probes).await
    }

    pub async fn available_ids(&self) -> HashSet<String> {
        self.status()
            .await
            .into_iter()
            .filter(|s| s.available)
            .map(|s| s.id)
            .collect()
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

/// Parses a JSON object out of model output.
///
/// Tries the fence-stripped text first, then the span from the first `{` to
/// the last `}` to tolerate chatter around the object.
pub fn parse_json_object(raw: &str) -> Result<serde_json::Map<String, Value>, PipelineError> {
    let text = strip_json_fences(raw);
    let candidates = [Some(text), outermost_braces(text)];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Ok(map);
        }
    }
    let preview: String = raw.chars().take(120).collect();
    Err(PipelineError::SchemaValidationFailed(format!(
        "response is not a JSON object: {preview}"
    )))
}

fn outermost_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_parse_json_object_with_surrounding_chatter() {
        let raw = "Sure! Here is the data:\n{\"contact\": {\"name\": \"Jane\"}}\nHope that helps.";
        let map = parse_json_object(raw).unwrap();
        assert_eq!(map["contact"]["name"], "Jane");
    }

    #[test]
    fn test_parse_json_object_rejects_garbage() {
        assert!(matches!(
            parse_json_object("I could not parse this resume."),
            Err(PipelineError::SchemaValidationFailed(_))
        ));
        assert!(parse_json_object("[1, 2, 3]").is_err());
    }

    #[tokio::test]
    async fn test_registry_reports_availability() {
        let registry = BackendRegistry::new()
            .with(Arc::new(ScriptedBackend::new("ollama", Vec::new())))
            .with(Arc::new(ScriptedBackend::unavailable("openai")));
        let available = registry.available_ids().await;
        assert!(available.contains("ollama"));
        assert!(!available.contains("openai"));
        assert_eq!(registry.status().await.len(), 2);
    }

    #[test]
    fn test_registry_replaces_same_id() {
        let registry = BackendRegistry::new()
            .with(Arc::new(ScriptedBackend::unavailable("gemini")))
            .with(Arc::new(ScriptedBackend::new("gemini", Vec::new())));
        assert!(registry.get("gemini").is_some());
        assert_eq!(registry.backends.len(), 1);
    }
}
