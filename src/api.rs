//! HTTP API for `ChatGemini`

mod assets;
mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::db::Database;
use crate::llm::ModelRegistry;
use crate::runtime::{
    DatabaseStore, EngineConfig, GraphEngine, ProductionEngine, RegistryModelClient,
    ToolRegistryExecutor,
};
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProductionEngine>,
    pub llm_registry: Arc<ModelRegistry>,
}

impl AppState {
    pub fn new(
        db: Database,
        llm_registry: Arc<ModelRegistry>,
        tools: ToolRegistry,
        config: EngineConfig,
    ) -> Self {
        let model = RegistryModelClient::new(
            Arc::clone(&llm_registry),
            llm_registry.default_model_id().to_string(),
        );
        let engine = GraphEngine::new(
            DatabaseStore::new(db),
            model,
            ToolRegistryExecutor::new(tools),
            config,
        );
        Self {
            engine: Arc::new(engine),
            llm_registry,
        }
    }

    /// Whether a model credential was configured at startup
    pub fn has_credentials(&self) -> bool {
        self.llm_registry.has_models()
    }
}
