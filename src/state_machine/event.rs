//! Events that drive the conversation graph

use super::state::ToolOutcome;
use crate::llm::{ModelTurn, Usage};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    /// The user submitted text for a new turn
    UserMessage { text: String },

    /// The model finished answering the current history
    ModelResponse { turn: ModelTurn, usage: Usage },

    /// A tool invocation finished successfully
    ToolComplete { outcome: ToolOutcome },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserMessage { .. } => "user_message",
            Event::ModelResponse { .. } => "model_response",
            Event::ToolComplete { .. } => "tool_complete",
        }
    }
}
