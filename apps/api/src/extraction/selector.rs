//! Model selection.
//!
//! Picks a backend/model pair from document size, content complexity and the
//! set of backends that are reachable right now. Size thresholds choose a
//! model, technical content may raise the tier, and an unreachable backend is
//! replaced by the next one in the static priority list. With nothing
//! reachable the choice is the offline heuristic extractor.

use std::collections::{BTreeSet, HashSet};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

pub const OFFLINE_BACKEND: &str = "offline";
pub const OFFLINE_MODEL: &str = "offline-heuristic";

/// Distinct technical terms needed to call a document technical.
pub const TECHNICAL_TERM_THRESHOLD: usize = 6;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Light,
    Balanced,
    High,
}

impl std::str::FromStr for ModelTier {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(ModelTier::Light),
            "balanced" => Ok(ModelTier::Balanced),
            "high" => Ok(ModelTier::High),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown model tier '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub backend_id: String,
    pub tier: ModelTier,
}

impl ModelSpec {
    pub fn new(name: &str, backend_id: &str, tier: ModelTier) -> Self {
        Self {
            name: name.to_string(),
            backend_id: backend_id.to_string(),
            tier,
        }
    }
}

/// Documents up to `max_size_chars` characters use `model`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelThreshold {
    pub max_size_chars: usize,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionConfig {
    /// Sorted ascending by `max_size_chars`.
    pub thresholds: Vec<ModelThreshold>,
    pub catalog: Vec<ModelSpec>,
    /// Fallback order when the preferred backend is unavailable.
    pub backend_priority: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![
                ModelThreshold {
                    max_size_chars: 4_000,
                    model: "llama3.2:3b".to_string(),
                },
                ModelThreshold {
                    max_size_chars: 12_000,
                    model: "llama3.1:8b".to_string(),
                },
            ],
            catalog: vec![
                ModelSpec::new("llama3.2:3b", "ollama", ModelTier::Light),
                ModelSpec::new("llama3.1:8b", "ollama", ModelTier::Balanced),
                ModelSpec::new("gpt-3.5-turbo", "openai", ModelTier::Light),
                ModelSpec::new("gpt-4-turbo", "openai", ModelTier::High),
                ModelSpec::new("gemini-1.5-flash", "gemini", ModelTier::Balanced),
                ModelSpec::new("claude-sonnet-4-5", "anthropic", ModelTier::High),
                ModelSpec::new(
                    "mistralai/Mistral-7B-Instruct-v0.2",
                    "huggingface",
                    ModelTier::Light,
                ),
            ],
            backend_priority: ["ollama", "openai", "gemini", "anthropic", "huggingface"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SelectionConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.catalog.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "model catalog is empty".to_string(),
            ));
        }
        for threshold in &self.thresholds {
            if self.spec(&threshold.model).is_none() {
                return Err(PipelineError::InvalidConfig(format!(
                    "threshold model '{}' is not in the model catalog",
                    threshold.model
                )));
            }
        }
        if !self
            .thresholds
            .windows(2)
            .all(|w| w[0].max_size_chars < w[1].max_size_chars)
        {
            return Err(PipelineError::InvalidConfig(
                "model thresholds must be strictly increasing".to_string(),
            ));
        }
        if self.backend_priority.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "backend priority list is empty".to_string(),
            ));
        }
        Ok(())
    }

    fn spec(&self, name: &str) -> Option<&ModelSpec> {
        self.catalog.iter().find(|m| m.name == name)
    }
}

/// Parses `"4000=llama3.2:3b;12000=llama3.1:8b"`.
pub fn parse_thresholds(raw: &str) -> Result<Vec<ModelThreshold>, PipelineError> {
    let mut thresholds = raw
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (size, model) = pair.split_once('=').ok_or_else(|| {
                PipelineError::InvalidConfig(format!("expected SIZE=MODEL, got '{pair}'"))
            })?;
            let max_size_chars = size.trim().parse::<usize>().map_err(|_| {
                PipelineError::InvalidConfig(format!("invalid size '{}' in '{pair}'", size.trim()))
            })?;
            Ok(ModelThreshold {
                max_size_chars,
                model: model.trim().to_string(),
            })
        })
        .collect::<Result<Vec<_>, PipelineError>>()?;
    thresholds.sort_by_key(|t| t.max_size_chars);
    Ok(thresholds)
}

/// Parses `"llama3.2:3b=ollama/light;gpt-4-turbo=openai/high"`.
pub fn parse_catalog(raw: &str) -> Result<Vec<ModelSpec>, PipelineError> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let malformed =
                || PipelineError::InvalidConfig(format!("expected MODEL=BACKEND/TIER, got '{entry}'"));
            let (name, rest) = entry.rsplit_once('=').ok_or_else(malformed)?;
            let (backend, tier) = rest.split_once('/').ok_or_else(malformed)?;
            Ok(ModelSpec {
                name: name.trim().to_string(),
                backend_id: backend.trim().to_string(),
                tier: tier.parse()?,
            })
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Complexity detection
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Plain,
    Technical,
}

lazy_static! {
    static ref TECHNICAL_TERMS: HashSet<&'static str> = [
        "algorithm", "algorithms", "api", "apis", "architecture", "aws", "azure",
        "backend", "c++", "c#", "ci/cd", "cloud", "compiler", "cuda", "database",
        "devops", "distributed", "docker", "embedded", "frontend", "gcp", "golang",
        "graphql", "java", "javascript", "kafka", "kernel", "kubernetes", "latency",
        "linux", "llm", "microservices", "ml", "mongodb", "nlp", "node.js",
        "postgresql", "python", "pytorch", "react", "redis", "rest", "rust",
        "scala", "spark", "sql", "terraform", "tensorflow", "typescript",
    ]
    .into_iter()
    .collect();
    static ref TECHNICAL_PHRASES: Vec<&'static str> = vec![
        "machine learning",
        "deep learning",
        "data pipeline",
        "computer vision",
        "natural language processing",
        "system design",
    ];
}

/// Counts distinct technical terms; documents at or above the threshold are technical.
pub fn detect_complexity(text: &str) -> Complexity {
    let lower = text.to_lowercase();
    let mut found: BTreeSet<&str> = lower
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '(' | ')' | '|'))
        .map(|t| t.trim_end_matches('.'))
        .filter_map(|t| TECHNICAL_TERMS.get(t).copied())
        .collect();
    found.extend(
        TECHNICAL_PHRASES
            .iter()
            .copied()
            .filter(|phrase| lower.contains(phrase)),
    );

    if found.len() >= TECHNICAL_TERM_THRESHOLD {
        Complexity::Technical
    } else {
        Complexity::Plain
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Selection
// ────────────────────────────────────────────────────────────────────────────

/// A backend/model pair to call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRoute {
    pub backend_id: String,
    pub model_name: String,
}

/// The selector's decision, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelChoice {
    pub backend_id: String,
    pub model_name: String,
    pub reason: String,
    /// Set when the desired model could not be used.
    #[serde(default)]
    pub downgraded: bool,
}

impl ModelChoice {
    pub fn offline(reason: impl Into<String>) -> Self {
        Self {
            backend_id: OFFLINE_BACKEND.to_string(),
            model_name: OFFLINE_MODEL.to_string(),
            reason: reason.into(),
            downgraded: true,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.backend_id == OFFLINE_BACKEND
    }

    pub fn route(&self) -> Option<ModelRoute> {
        (!self.is_offline()).then(|| ModelRoute {
            backend_id: self.backend_id.clone(),
            model_name: self.model_name.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    config: SelectionConfig,
}

impl ModelSelector {
    pub fn new(config: SelectionConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn backend_priority(&self) -> &[String] {
        &self.config.backend_priority
    }

    pub fn select(
        &self,
        document_size: usize,
        complexity: Complexity,
        available: &HashSet<String>,
    ) -> ModelChoice {
        let (mut desired, mut reason) = match self
            .config
            .thresholds
            .iter()
            .find(|t| document_size <= t.max_size_chars)
            .and_then(|t| self.config.spec(&t.model).map(|spec| (t, spec)))
        {
            Some((threshold, spec)) => (
                spec,
                format!(
                    "{document_size} chars fits the {} char threshold",
                    threshold.max_size_chars
                ),
            ),
            None => match self.strongest(|_| true) {
                Some(spec) => (
                    spec,
                    format!("{document_size} chars exceeds every size threshold"),
                ),
                None => return ModelChoice::offline("model catalog has no usable models"),
            },
        };

        if complexity == Complexity::Technical {
            if let Some(strongest) = self.strongest(|spec| available.contains(&spec.backend_id)) {
                if strongest.tier > desired.tier {
                    desired = strongest;
                    reason = format!(
                        "{reason}; technical content upgraded to the {:?} tier",
                        strongest.tier
                    );
                }
            }
        }

        if available.contains(&desired.backend_id) {
            return ModelChoice {
                backend_id: desired.backend_id.clone(),
                model_name: desired.name.clone(),
                reason,
                downgraded: false,
            };
        }

        for backend in &self.config.backend_priority {
            if backend == &desired.backend_id || !available.contains(backend) {
                continue;
            }
            if let Some(spec) = self.closest_on_backend(backend, desired.tier) {
                return ModelChoice {
                    backend_id: spec.backend_id.clone(),
                    model_name: spec.name.clone(),
                    reason: format!(
                        "{reason}; {} is unavailable, falling back to {}",
                        desired.backend_id, backend
                    ),
                    downgraded: true,
                };
            }
        }

        ModelChoice::offline(format!("{reason}; no AI backend is available"))
    }

    /// Routes to try after `choice` fails: one model per other available
    /// backend, in priority order.
    pub fn fallback_routes(
        &self,
        choice: &ModelChoice,
        available: &HashSet<String>,
    ) -> Vec<ModelRoute> {
        let tier = self
            .config
            .spec(&choice.model_name)
            .map(|s| s.tier)
            .unwrap_or(ModelTier::Balanced);
        self.routes_for_tier(tier, available)
            .into_iter()
            .filter(|route| route.backend_id != choice.backend_id)
            .collect()
    }

    /// One model per available backend, in priority order, closest to `tier`.
    pub fn routes_for_tier(&self, tier: ModelTier, available: &HashSet<String>) -> Vec<ModelRoute> {
        self.config
            .backend_priority
            .iter()
            .filter(|backend| available.contains(*backend))
            .filter_map(|backend| self.closest_on_backend(backend, tier))
            .map(|spec| ModelRoute {
                backend_id: spec.backend_id.clone(),
                model_name: spec.name.clone(),
            })
            .collect()
    }

    /// Highest-tier model among backends accepted by `filter`, ties broken by priority.
    fn strongest(&self, filter: impl Fn(&ModelSpec) -> bool) -> Option<&ModelSpec> {
        let rank = |spec: &ModelSpec| {
            self.config
                .backend_priority
                .iter()
                .position(|b| b == &spec.backend_id)
                .unwrap_or(usize::MAX)
        };
        self.config
            .catalog
            .iter()
            .filter(|spec| filter(spec))
            .min_by_key(|spec| (std::cmp::Reverse(spec.tier), rank(spec)))
    }

    /// The backend's strongest model not above `tier`, else its weakest model.
    fn closest_on_backend(&self, backend: &str, tier: ModelTier) -> Option<&ModelSpec> {
        let models = || self.config.catalog.iter().filter(|m| m.backend_id == backend);
        models()
            .filter(|m| m.tier <= tier)
            .max_by_key(|m| m.tier)
            .or_else(|| models().min_by_key(|m| m.tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> ModelSelector {
        ModelSelector::new(SelectionConfig::default()).unwrap()
    }

    fn available(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_small_document_uses_light_local_model() {
        let choice = selector().select(1_000, Complexity::Plain, &available(&["ollama"]));
        assert_eq!(choice.backend_id, "ollama");
        assert_eq!(choice.model_name, "llama3.2:3b");
        assert!(!choice.downgraded);
    }

    #[test]
    fn test_medium_document_uses_second_threshold() {
        let choice = selector().select(8_000, Complexity::Plain, &available(&["ollama"]));
        assert_eq!(choice.model_name, "llama3.1:8b");
    }

    #[test]
    fn test_large_document_uses_strongest_model() {
        let choice = selector().select(
            50_000,
            Complexity::Plain,
            &available(&["ollama", "openai", "anthropic"]),
        );
        assert_eq!(choice.backend_id, "openai");
        assert_eq!(choice.model_name, "gpt-4-turbo");
    }

    #[test]
    fn test_technical_content_upgrades_tier() {
        let choice = selector().select(
            1_000,
            Complexity::Technical,
            &available(&["ollama", "anthropic"]),
        );
        assert_eq!(choice.backend_id, "anthropic");
        assert!(choice.reason.contains("technical"));
    }

    #[test]
    fn test_technical_content_without_stronger_backend_keeps_size_choice() {
        let choice = selector().select(1_000, Complexity::Technical, &available(&["ollama"]));
        assert_eq!(choice.model_name, "llama3.2:3b");
    }

    #[test]
    fn test_unavailable_backend_falls_back_by_priority() {
        let choice = selector().select(1_000, Complexity::Plain, &available(&["gemini", "openai"]));
        assert_eq!(choice.backend_id, "openai");
        assert_eq!(choice.model_name, "gpt-3.5-turbo");
        assert!(choice.reason.contains("unavailable"));
        assert!(choice.downgraded);
    }

    #[test]
    fn test_huggingface_is_last_resort() {
        let choice = selector().select(1_000, Complexity::Plain, &available(&["huggingface"]));
        assert_eq!(choice.backend_id, "huggingface");
        assert_eq!(choice.model_name, "mistralai/Mistral-7B-Instruct-v0.2");
        assert!(choice.downgraded);
    }

    #[test]
    fn test_nothing_available_is_offline() {
        let choice = selector().select(1_000, Complexity::Plain, &HashSet::new());
        assert!(choice.is_offline());
        assert!(choice.route().is_none());
    }

    #[test]
    fn test_fallback_routes_skip_chosen_backend() {
        let s = selector();
        let avail = available(&["ollama", "gemini", "anthropic"]);
        let choice = s.select(1_000, Complexity::Plain, &avail);
        let routes = s.fallback_routes(&choice, &avail);
        let backends: Vec<&str> = routes.iter().map(|r| r.backend_id.as_str()).collect();
        assert_eq!(backends, vec!["gemini", "anthropic"]);
    }

    #[test]
    fn test_detect_complexity() {
        let technical = "Built microservices in Rust and Python on Kubernetes with Kafka, \
                         PostgreSQL and Terraform; machine learning pipelines in PyTorch.";
        assert_eq!(detect_complexity(technical), Complexity::Technical);
        let plain = "Managed a retail team of 12, handled scheduling and customer service.";
        assert_eq!(detect_complexity(plain), Complexity::Plain);
    }

    #[test]
    fn test_parse_thresholds_sorts() {
        let parsed = parse_thresholds("12000=llama3.1:8b; 4000=llama3.2:3b").unwrap();
        assert_eq!(parsed[0].max_size_chars, 4000);
        assert_eq!(parsed[1].model, "llama3.1:8b");
        assert!(parse_thresholds("big=gpt-4").is_err());
        assert!(parse_thresholds("4000").is_err());
    }

    #[test]
    fn test_parse_catalog() {
        let catalog = parse_catalog("llama3.2:3b=ollama/light;gpt-4-turbo=openai/high").unwrap();
        assert_eq!(catalog[0], ModelSpec::new("llama3.2:3b", "ollama", ModelTier::Light));
        assert_eq!(catalog[1].tier, ModelTier::High);
        assert!(parse_catalog("x=ollama/huge").is_err());
    }

    #[test]
    fn test_threshold_model_must_be_in_catalog() {
        let config = SelectionConfig {
            thresholds: vec![ModelThreshold {
                max_size_chars: 10,
                model: "unknown".to_string(),
            }],
            ..Default::default()
        };
        assert!(ModelSelector::new(config).is_err());
    }
}
