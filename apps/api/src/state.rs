use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::Orchestrator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Config,
}
