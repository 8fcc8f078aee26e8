//! Structured extraction: drives LLM backends through the extraction prompt
//! and turns their replies into a validated `ResumeRecord`.
//!
//! The fallback chain is an explicit list of strategies tried in order:
//!
//! 1. the selected route, with one corrective retry when the reply is not JSON
//! 2. each fallback route, in backend priority order, same retry rule
//! 3. offline heuristics, which cannot fail
//!
//! A reply that parses but lacks `contact.name` stops the chain and is merged
//! with the offline heuristics. Every attempt is recorded in the provenance.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::extraction::offline::extract_offline;
use crate::extraction::prompts::{
    CORRECTIVE_PROMPT_TEMPLATE, EXTRACTION_PROMPT_TEMPLATE, EXTRACTION_SYSTEM,
};
use crate::extraction::schema::{self, Validated};
use crate::extraction::selector::{ModelChoice, ModelRoute};
use crate::llm_client::prompts::GROUNDING_INSTRUCTION;
use crate::llm_client::{
    parse_json_object, BackendRegistry, CompletionOptions, CompletionRequest, LlmBackend,
};
use crate::models::resume::ResumeRecord;
use crate::retry::{call_with_policy, CallPolicy};

/// Resume text beyond this many characters is not sent to a model.
pub const MAX_PROMPT_CHARS: usize = 20_000;

pub const OFFLINE_ANNOTATION: &str = "used offline fallback extraction";
pub const HEURISTIC_MERGE_ANNOTATION: &str =
    "model output missing contact.name; merged with offline heuristics";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Model,
    HeuristicMerge,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Parsed, but a required field was empty.
    MissingRequired,
    InvalidJson,
    /// The backend call failed; carries the error kind.
    BackendError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionAttempt {
    pub backend_id: String,
    pub model_name: String,
    /// True for the retry sent after an unparseable reply.
    pub corrective: bool,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionProvenance {
    pub strategy: ExtractionStrategy,
    pub backend_id: Option<String>,
    pub model_name: Option<String>,
    pub attempts: Vec<ExtractionAttempt>,
    pub dropped_fields: Vec<String>,
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    pub record: ResumeRecord,
    pub provenance: ExtractionProvenance,
}

#[derive(Clone)]
pub struct StructuredExtractor {
    backends: Arc<BackendRegistry>,
    policy: CallPolicy,
    options: CompletionOptions,
}

impl StructuredExtractor {
    pub fn new(
        backends: Arc<BackendRegistry>,
        policy: CallPolicy,
        options: CompletionOptions,
    ) -> Self {
        Self {
            backends,
            policy,
            options,
        }
    }

    /// Extracts a record from `text` starting with `choice`, then `fallbacks`.
    ///
    /// Backend failures are absorbed into the chain. Only configuration or
    /// argument errors reported by a backend are returned.
    pub async fn extract(
        &self,
        text: &str,
        choice: &ModelChoice,
        fallbacks: &[ModelRoute],
    ) -> Result<ExtractionOutcome, PipelineError> {
        let prompt_text = truncate_chars(text, MAX_PROMPT_CHARS);
        let mut attempts = Vec::new();
        let mut annotations = Vec::new();
        if choice.downgraded {
            annotations.push(format!("selected model unavailable; {}", choice.reason));
        }

        let chosen = choice.route();
        let mut routes: Vec<ModelRoute> = chosen.iter().cloned().collect();
        for route in fallbacks {
            if !routes.contains(route) {
                routes.push(route.clone());
            }
        }

        for (i, route) in routes.iter().enumerate() {
            let Some(backend) = self.backends.get(&route.backend_id) else {
                attempts.push(attempt(
                    route,
                    false,
                    AttemptOutcome::BackendError("backend_unavailable".into()),
                    Some("backend is not configured".into()),
                ));
                continue;
            };

            let Some(validated) = self
                .try_route(backend.as_ref(), route, prompt_text, &mut attempts)
                .await?
            else {
                continue;
            };

            if i > 0 {
                let note = format!(
                    "{}/{} failed; used fallback {}/{}",
                    routes[0].backend_id, routes[0].model_name, route.backend_id, route.model_name
                );
                warn!("{}", note);
                annotations.push(note);
            }

            let Validated {
                mut record,
                dropped_fields,
                missing_required,
            } = validated;

            let strategy = if missing_required.is_empty() {
                ExtractionStrategy::Model
            } else {
                warn!(
                    "{}/{} reply missing {:?}; merging with offline heuristics",
                    route.backend_id, route.model_name, missing_required
                );
                record.merge_missing_from(extract_offline(text));
                annotations.push(HEURISTIC_MERGE_ANNOTATION.to_string());
                ExtractionStrategy::HeuristicMerge
            };

            info!(
                "Extraction finished via {:?} ({}/{}, {} attempts, {} dropped fields)",
                strategy,
                route.backend_id,
                route.model_name,
                attempts.len(),
                dropped_fields.len()
            );
            return Ok(ExtractionOutcome {
                record,
                provenance: ExtractionProvenance {
                    strategy,
                    backend_id: Some(route.backend_id.clone()),
                    model_name: Some(route.model_name.clone()),
                    attempts,
                    dropped_fields,
                    annotations,
                },
            });
        }

        warn!(
            "No model produced a usable record after {} attempts; using offline extraction",
            attempts.len()
        );
        annotations.push(OFFLINE_ANNOTATION.to_string());
        Ok(ExtractionOutcome {
            record: extract_offline(text),
            provenance: ExtractionProvenance {
                strategy: ExtractionStrategy::Offline,
                backend_id: None,
                model_name: None,
                attempts,
                dropped_fields: Vec::new(),
                annotations,
            },
        })
    }

    /// One route: the extraction prompt, then a corrective retry if the
    /// reply was not usable JSON. `Ok(None)` moves on to the next route.
    async fn try_route(
        &self,
        backend: &dyn LlmBackend,
        route: &ModelRoute,
        text: &str,
        attempts: &mut Vec<ExtractionAttempt>,
    ) -> Result<Option<Validated>, PipelineError> {
        let prompt = EXTRACTION_PROMPT_TEMPLATE
            .replace("{grounding}", GROUNDING_INSTRUCTION)
            .replace("{resume_text}", text);

        let raw = match self.complete(backend, route, &prompt).await {
            Ok(raw) => raw,
            Err(e) => return record_backend_error(route, false, e, attempts),
        };
        let parse_error = match parse_and_validate(&raw) {
            Ok(validated) => {
                attempts.push(attempt(route, false, outcome_for(&validated), None));
                return Ok(Some(validated));
            }
            Err(e) => e,
        };
        warn!(
            "{}/{} returned invalid JSON ({}); sending corrective prompt",
            route.backend_id, route.model_name, parse_error
        );
        attempts.push(attempt(
            route,
            false,
            AttemptOutcome::InvalidJson,
            Some(parse_error.to_string()),
        ));

        let corrective = CORRECTIVE_PROMPT_TEMPLATE
            .replace("{error}", &parse_error.to_string())
            .replace("{resume_text}", text);
        let raw = match self.complete(backend, route, &corrective).await {
            Ok(raw) => raw,
            Err(e) => return record_backend_error(route, true, e, attempts),
        };
        match parse_and_validate(&raw) {
            Ok(validated) => {
                attempts.push(attempt(route, true, outcome_for(&validated), None));
                Ok(Some(validated))
            }
            Err(e) => {
                warn!(
                    "{}/{} still invalid after corrective prompt ({})",
                    route.backend_id, route.model_name, e
                );
                attempts.push(attempt(
                    route,
                    true,
                    AttemptOutcome::InvalidJson,
                    Some(e.to_string()),
                ));
                Ok(None)
            }
        }
    }

    async fn complete(
        &self,
        backend: &dyn LlmBackend,
        route: &ModelRoute,
        prompt: &str,
    ) -> Result<String, PipelineError> {
        let request = CompletionRequest {
            model: &route.model_name,
            system: EXTRACTION_SYSTEM,
            prompt,
            options: self.options,
        };
        let label = format!("{}/{}", route.backend_id, route.model_name);
        call_with_policy(&self.policy, &label, || backend.complete(&request)).await
    }
}

fn parse_and_validate(raw: &str) -> Result<Validated, PipelineError> {
    let object = parse_json_object(raw)?;
    schema::validate(&object)
}

fn outcome_for(validated: &Validated) -> AttemptOutcome {
    if validated.is_complete() {
        AttemptOutcome::Success
    } else {
        AttemptOutcome::MissingRequired
    }
}

fn record_backend_error(
    route: &ModelRoute,
    corrective: bool,
    error: PipelineError,
    attempts: &mut Vec<ExtractionAttempt>,
) -> Result<Option<Validated>, PipelineError> {
    if error.is_terminal() {
        return Err(error);
    }
    warn!(
        "{}/{} failed ({}); trying next strategy",
        route.backend_id, route.model_name, error
    );
    attempts.push(attempt(
        route,
        corrective,
        AttemptOutcome::BackendError(error.kind().to_string()),
        Some(error.to_string()),
    ));
    Ok(None)
}

fn attempt(
    route: &ModelRoute,
    corrective: bool,
    outcome: AttemptOutcome,
    detail: Option<String>,
) -> ExtractionAttempt {
    ExtractionAttempt {
        backend_id: route.backend_id.clone(),
        model_name: route.model_name.clone(),
        corrective,
        outcome,
        detail,
    }
}

/// Cuts `text` to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::ScriptedBackend;
    use std::time::Duration;

    const RESUME: &str = "Jane Doe\njane@x.com\n555-123-4567\n\nSkills\nRust, Python\n";

    const GOOD_JSON: &str = r#"{"contact": {"name": "Jane Doe", "email": "jane@x.com", "phone": "555-123-4567"}, "skills": ["Rust", "Python"], "hobbies": ["chess"]}"#;

    fn policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(5),
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    fn route(backend: &str, model: &str) -> ModelRoute {
        ModelRoute {
            backend_id: backend.to_string(),
            model_name: model.to_string(),
        }
    }

    fn choice(backend: &str, model: &str) -> ModelChoice {
        ModelChoice {
            backend_id: backend.to_string(),
            model_name: model.to_string(),
            reason: "test".to_string(),
            downgraded: false,
        }
    }

    fn extractor(backends: Vec<Arc<ScriptedBackend>>) -> StructuredExtractor {
        let mut registry = BackendRegistry::new();
        for backend in backends {
            registry.register(backend);
        }
        StructuredExtractor::new(Arc::new(registry), policy(), CompletionOptions::default())
    }

    #[tokio::test]
    async fn test_valid_reply_uses_model_strategy() {
        let ollama = Arc::new(ScriptedBackend::new("ollama", vec![Ok(GOOD_JSON.to_string())]));
        let outcome = extractor(vec![ollama.clone()])
            .extract(RESUME, &choice("ollama", "llama3.2:3b"), &[])
            .await
            .unwrap();

        assert_eq!(outcome.provenance.strategy, ExtractionStrategy::Model);
        assert_eq!(outcome.provenance.model_name.as_deref(), Some("llama3.2:3b"));
        assert_eq!(outcome.record.contact.name, "Jane Doe");
        assert_eq!(outcome.provenance.dropped_fields, vec!["hobbies"]);
        assert_eq!(ollama.call_count(), 1);
        assert_eq!(ollama.models.lock().unwrap()[0], "llama3.2:3b");
        assert!(ollama.prompts.lock().unwrap()[0].contains("RESUME TEXT:\nJane Doe"));
    }

    #[tokio::test]
    async fn test_invalid_json_gets_one_corrective_retry() {
        let ollama = Arc::new(ScriptedBackend::new(
            "ollama",
            vec![
                Ok("Here is the resume: name Jane".to_string()),
                Ok(format!("```json\n{GOOD_JSON}\n```")),
            ],
        ));
        let outcome = extractor(vec![ollama.clone()])
            .extract(RESUME, &choice("ollama", "llama3.2:3b"), &[])
            .await
            .unwrap();

        assert_eq!(outcome.provenance.strategy, ExtractionStrategy::Model);
        let outcomes: Vec<(bool, AttemptOutcome)> = outcome
            .provenance
            .attempts
            .iter()
            .map(|a| (a.corrective, a.outcome.clone()))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (false, AttemptOutcome::InvalidJson),
                (true, AttemptOutcome::Success)
            ]
        );
        assert!(ollama.prompts.lock().unwrap()[1].contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_second_invalid_reply_falls_back_to_next_backend() {
        let ollama = Arc::new(ScriptedBackend::new(
            "ollama",
            vec![Ok("nope".to_string()), Ok("still nope".to_string())],
        ));
        let openai = Arc::new(ScriptedBackend::new("openai", vec![Ok(GOOD_JSON.to_string())]));
        let outcome = extractor(vec![ollama.clone(), openai.clone()])
            .extract(
                RESUME,
                &choice("ollama", "llama3.2:3b"),
                &[route("openai", "gpt-3.5-turbo")],
            )
            .await
            .unwrap();

        assert_eq!(ollama.call_count(), 2);
        assert_eq!(openai.call_count(), 1);
        assert_eq!(outcome.provenance.backend_id.as_deref(), Some("openai"));
        assert_eq!(outcome.provenance.attempts.len(), 3);
        assert!(outcome
            .provenance
            .annotations
            .iter()
            .any(|a| a.contains("used fallback openai/gpt-3.5-turbo")));
    }

    #[tokio::test]
    async fn test_backend_errors_fall_through_to_offline() {
        let ollama = Arc::new(ScriptedBackend::new(
            "ollama",
            vec![Err(PipelineError::Timeout(Duration::from_secs(30)))],
        ));
        let gemini = Arc::new(ScriptedBackend::new(
            "gemini",
            vec![Err(PipelineError::RateLimited("slow down".into()))],
        ));
        let outcome = extractor(vec![ollama, gemini])
            .extract(
                RESUME,
                &choice("ollama", "llama3.2:3b"),
                &[route("gemini", "gemini-1.5-flash")],
            )
            .await
            .unwrap();

        assert_eq!(outcome.provenance.strategy, ExtractionStrategy::Offline);
        assert_eq!(outcome.record.contact.name, "Jane Doe");
        assert_eq!(outcome.record.contact.email, "jane@x.com");
        assert_eq!(
            outcome.provenance.annotations,
            vec![OFFLINE_ANNOTATION.to_string()]
        );
        let kinds: Vec<AttemptOutcome> = outcome
            .provenance
            .attempts
            .iter()
            .map(|a| a.outcome.clone())
            .collect();
        assert_eq!(
            kinds,
            vec![
                AttemptOutcome::BackendError("timeout".into()),
                AttemptOutcome::BackendError("rate_limited".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_name_merges_offline_heuristics() {
        let reply = r#"{"contact": {"email": "model@x.com"}, "skills": ["Go"]}"#;
        let ollama = Arc::new(ScriptedBackend::new("ollama", vec![Ok(reply.to_string())]));
        let openai = Arc::new(ScriptedBackend::new("openai", vec![Ok(GOOD_JSON.to_string())]));
        let outcome = extractor(vec![ollama, openai.clone()])
            .extract(
                RESUME,
                &choice("ollama", "llama3.2:3b"),
                &[route("openai", "gpt-3.5-turbo")],
            )
            .await
            .unwrap();

        assert_eq!(outcome.provenance.strategy, ExtractionStrategy::HeuristicMerge);
        assert_eq!(outcome.record.contact.name, "Jane Doe");
        assert_eq!(outcome.record.contact.email, "model@x.com");
        assert_eq!(outcome.record.skills, vec!["Go"]);
        assert_eq!(openai.call_count(), 0);
        assert_eq!(
            outcome.provenance.attempts[0].outcome,
            AttemptOutcome::MissingRequired
        );
    }

    #[tokio::test]
    async fn test_reply_without_contact_merges_offline_heuristics() {
        let reply = r#"{"skills": ["Go"]}"#;
        let ollama = Arc::new(ScriptedBackend::new("ollama", vec![Ok(reply.to_string())]));
        let outcome = extractor(vec![ollama])
            .extract("Jane Doe\njane@x.com", &choice("ollama", "llama3.2:3b"), &[])
            .await
            .unwrap();

        assert_eq!(outcome.provenance.strategy, ExtractionStrategy::HeuristicMerge);
        assert_eq!(outcome.record.contact.name, "Jane Doe");
        assert_eq!(outcome.record.contact.email, "jane@x.com");
        assert_eq!(outcome.record.skills, vec!["Go"]);
        assert!(outcome
            .provenance
            .annotations
            .contains(&HEURISTIC_MERGE_ANNOTATION.to_string()));
    }

    #[tokio::test]
    async fn test_offline_choice_skips_backends() {
        let ollama = Arc::new(ScriptedBackend::new("ollama", vec![Ok(GOOD_JSON.to_string())]));
        let outcome = extractor(vec![ollama.clone()])
            .extract(RESUME, &ModelChoice::offline("no AI backend is available"), &[])
            .await
            .unwrap();

        assert_eq!(outcome.provenance.strategy, ExtractionStrategy::Offline);
        assert_eq!(ollama.call_count(), 0);
        assert!(outcome.provenance.annotations[0].starts_with("selected model unavailable"));
        assert_eq!(outcome.record.contact.name, "Jane Doe");
    }

    #[tokio::test]
    async fn test_unregistered_route_is_recorded_and_skipped() {
        let outcome = extractor(Vec::new())
            .extract(RESUME, &choice("anthropic", "claude-sonnet-4-5"), &[])
            .await
            .unwrap();
        assert_eq!(outcome.provenance.strategy, ExtractionStrategy::Offline);
        assert_eq!(
            outcome.provenance.attempts[0].outcome,
            AttemptOutcome::BackendError("backend_unavailable".into())
        );
    }

    #[tokio::test]
    async fn test_terminal_backend_error_is_surfaced() {
        let ollama = Arc::new(ScriptedBackend::new(
            "ollama",
            vec![Err(PipelineError::InvalidConfig("model name is empty".into()))],
        ));
        let err = extractor(vec![ollama])
            .extract(RESUME, &choice("ollama", ""), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
