//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the engine with mock implementations.

use crate::db::{ChatMessage, Checkpoint, DbError, ThreadSnapshot, ThreadSummary};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmStream, ToolDefinition};
use crate::tools::{ToolContext, ToolError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Persistence failure as seen by the engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Thread not found: {0}")]
    NotFound(String),
    #[error("Store failure: {0}")]
    Backend(String),
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::ThreadNotFound(id) => StoreError::NotFound(id),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Storage for thread histories and checkpoints
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Register an empty thread
    async fn create_thread(&self, thread_id: &str) -> Result<(), StoreError>;

    /// Load history and current checkpoint
    async fn load(&self, thread_id: &str) -> Result<ThreadSnapshot, StoreError>;

    /// Persist history and checkpoint atomically
    async fn save(
        &self,
        thread_id: &str,
        history: &[ChatMessage],
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError>;

    /// Replace only the current checkpoint
    async fn put_checkpoint(&self, thread_id: &str, checkpoint: &Checkpoint)
        -> Result<(), StoreError>;

    /// All known thread ids, most recent first
    async fn list_thread_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Sidebar summaries, most recent first
    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, StoreError>;
}

/// Client for the language model
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Answer a request in one shot
    async fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Answer a request incrementally
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Executor for tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Result<String, ToolError>;

    /// Get tool definitions for the model
    fn definitions(&self) -> Vec<ToolDefinition>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ThreadStore + ?Sized> ThreadStore for Arc<T> {
    async fn create_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        (**self).create_thread(thread_id).await
    }

    async fn load(&self, thread_id: &str) -> Result<ThreadSnapshot, StoreError> {
        (**self).load(thread_id).await
    }

    async fn save(
        &self,
        thread_id: &str,
        history: &[ChatMessage],
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        (**self).save(thread_id, history, checkpoint).await
    }

    async fn put_checkpoint(
        &self,
        thread_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        (**self).put_checkpoint(thread_id, checkpoint).await
    }

    async fn list_thread_ids(&self) -> Result<Vec<String>, StoreError> {
        (**self).list_thread_ids().await
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, StoreError> {
        (**self).list_threads().await
    }
}

#[async_trait]
impl<T: ModelClient + ?Sized> ModelClient for Arc<T> {
    async fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).invoke(request).await
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        (**self).stream(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Result<String, ToolError> {
        (**self).execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        (**self).definitions()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

use crate::db::Database;
use crate::llm::ModelRegistry;
use crate::tools::ToolRegistry;

/// Adapter to use Database as `ThreadStore`
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ThreadStore for DatabaseStore {
    async fn create_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        self.db.create_thread(thread_id).map_err(StoreError::from)
    }

    async fn load(&self, thread_id: &str) -> Result<ThreadSnapshot, StoreError> {
        self.db.load(thread_id).map_err(StoreError::from)
    }

    async fn save(
        &self,
        thread_id: &str,
        history: &[ChatMessage],
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        self.db
            .save(thread_id, history, checkpoint)
            .map_err(StoreError::from)
    }

    async fn put_checkpoint(
        &self,
        thread_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        self.db
            .put_checkpoint(thread_id, checkpoint)
            .map_err(StoreError::from)
    }

    async fn list_thread_ids(&self) -> Result<Vec<String>, StoreError> {
        self.db.list_thread_ids().map_err(StoreError::from)
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, StoreError> {
        self.db.list_threads().map_err(StoreError::from)
    }
}

/// Adapter to use `ModelRegistry` as `ModelClient`
pub struct RegistryModelClient {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryModelClient {
    pub fn new(registry: Arc<ModelRegistry>, model_id: String) -> Self {
        Self { registry, model_id }
    }

    fn service(&self) -> Result<Arc<dyn crate::llm::LlmService>, LlmError> {
        self.registry
            .get(&self.model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| LlmError::auth("No model available: credentials required"))
    }
}

#[async_trait]
impl ModelClient for RegistryModelClient {
    async fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.service()?.complete(request).await
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        self.service()?.stream(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Adapter to use `ToolRegistry` as `ToolExecutor`
pub struct ToolRegistryExecutor {
    registry: ToolRegistry,
}

impl ToolRegistryExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistryExecutor {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Result<String, ToolError> {
        self.registry.execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }
}
