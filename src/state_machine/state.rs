//! Conversation graph state types

use crate::llm::ToolCall;
use serde::{Deserialize, Serialize};

/// Default cap on model → tool → model cycles within one turn
pub const DEFAULT_MAX_TOOL_CYCLES: u32 = 5;

/// Result of a single tool invocation, kept until the cycle completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(call: &ToolCall, output: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output: message.into(),
            is_error: true,
        }
    }
}

/// Graph state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphState {
    /// History ends with a user or tool message; the model is being asked
    AwaitingModel {
        /// Completed tool cycles in this turn
        cycle: u32,
    },

    /// The model asked for tools; executing them serially
    AwaitingTool {
        /// Tool cycle this batch belongs to (1-based)
        cycle: u32,
        /// The call currently executing
        current: ToolCall,
        /// Calls still to run after `current`
        remaining: Vec<ToolCall>,
        /// Results gathered so far in this cycle
        #[serde(default)]
        completed: Vec<ToolOutcome>,
    },

    /// Turn finished; also the resting state between turns
    #[default]
    Done,
}

impl GraphState {
    /// A turn is in flight
    pub fn is_busy(&self) -> bool {
        !matches!(self, GraphState::Done)
    }

    /// Snake-case name used in logs and the API
    pub fn name(&self) -> &'static str {
        match self {
            GraphState::AwaitingModel { .. } => "awaiting_model",
            GraphState::AwaitingTool { .. } => "awaiting_tool",
            GraphState::Done => "done",
        }
    }

    /// Ids of tool calls not yet completed
    pub fn pending_call_ids(&self) -> Vec<&str> {
        match self {
            GraphState::AwaitingTool {
                current, remaining, ..
            } => std::iter::once(current)
                .chain(remaining.iter())
                .map(|c| c.id.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Context for a conversation graph run (immutable configuration)
#[derive(Debug, Clone)]
pub struct GraphContext {
    pub thread_id: String,
    /// Maximum number of tool cycles before the turn is aborted
    pub max_tool_cycles: u32,
}

impl GraphContext {
    pub fn new(thread_id: impl Into<String>, max_tool_cycles: u32) -> Self {
        Self {
            thread_id: thread_id.into(),
            max_tool_cycles,
        }
    }
}
