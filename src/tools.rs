//! Tool implementations for `ChatGemini`
//!
//! Tools are stateless singletons registered once at startup. Every
//! invocation receives its per-call context explicitly.

mod web_search;

pub use web_search::WebSearchTool;

use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default upper bound on a single tool invocation
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(20);

/// Tool invocation failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Tool failed: {0}")]
    Failed(String),
    #[error("No results for {0:?}")]
    NoResults(String),
    #[error("Tool timed out after {0:?}")]
    TimedOut(Duration),
}

/// Context for a single tool invocation
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The thread this tool is executing within
    pub thread_id: String,
}

impl ToolContext {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
        }
    }
}

/// Trait for tools that can be invoked by the model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool, returning its text result
    async fn run(&self, input: Value, ctx: ToolContext) -> Result<String, ToolError>;
}

/// Collection of tools available to conversations
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Create the standard registry: web search only
    pub fn standard(timeout: Duration) -> Self {
        Self::new(vec![Arc::new(WebSearchTool::new())], timeout)
    }

    pub fn new(tools: Vec<Arc<dyn Tool>>, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name, bounded by the registry timeout
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: ToolContext,
    ) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        match tokio::time::timeout(self.timeout, tool.run(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::TimedOut(self.timeout)),
        }
    }
}
