//! `ChatGemini` - a small web chat over Gemini with a web-search tool
//!
//! Each conversation turn is driven by a pure state machine; threads and
//! their checkpoints are persisted to SQLite.

mod api;
mod config;
mod db;
mod llm;
mod runtime;
mod state_machine;
mod system_prompt;
mod tools;

use api::{create_router, AppState};
use config::{AppConfig, DEFAULT_LOG_FILTER};
use db::Database;
use llm::ModelRegistry;
use runtime::EngineConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tools::ToolRegistry;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // A process that died mid-turn leaves a busy checkpoint behind
    let reset = db.reset_in_flight_checkpoints()?;
    if reset > 0 {
        tracing::warn!(count = reset, "Reset interrupted turns to done");
    }

    let llm_registry = Arc::new(ModelRegistry::new(&config.llm));
    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No Gemini API key configured. Set GOOGLE_API_KEY to enable chat.");
    }

    let engine_config = EngineConfig {
        max_tool_cycles: config.max_tool_cycles,
        ..EngineConfig::default()
    };
    let state = AppState::new(
        db,
        llm_registry,
        ToolRegistry::standard(config.tool_timeout),
        engine_config,
    );

    let known = state.engine.list_thread_ids().await?;
    tracing::info!(threads = known.len(), "Thread store ready");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("ChatGemini server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
