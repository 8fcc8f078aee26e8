//! Structured extraction: model selection, prompting, schema validation and
//! the offline heuristic fallback.

pub mod extractor;
pub mod offline;
pub mod prompts;
pub mod schema;
pub mod selector;
