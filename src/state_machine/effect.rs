//! Effects produced by state transitions

use crate::db::ChatMessage;
use crate::llm::ToolCall;

/// Effects to be executed by the runtime after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append a message to the turn's working history
    AppendMessage(ChatMessage),

    /// Write the new state as the thread's current checkpoint
    Checkpoint,

    /// Ask the model to answer the working history
    RequestModel,

    /// Invoke a single tool
    InvokeTool { call: ToolCall },

    /// Persist the working history together with the final checkpoint
    Commit { reply: String },
}

impl Effect {
    pub fn invoke_tool(call: ToolCall) -> Self {
        Effect::InvokeTool { call }
    }
}
