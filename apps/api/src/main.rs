mod config;
mod db;
mod embedding;
mod errors;
mod extract;
mod extraction;
mod http;
mod llm_client;
mod models;
mod pipeline;
mod rag;
mod retry;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::pipeline::build_orchestrator;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; malformed values abort startup
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume parser v{}", env!("CARGO_PKG_VERSION"));

    // Backends, embedder, vector index
    let orchestrator = build_orchestrator(&config).await?;
    info!(
        "Pipeline ready (chunk size {}, overlap {}, top-k {})",
        config.pipeline.chunk_size, config.pipeline.chunk_overlap, config.pipeline.rag_top_k
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once a frontend host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
