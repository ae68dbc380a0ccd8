//! Common types for LLM interactions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// LLM request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Vec<SystemContent>,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

/// System prompt content
#[derive(Debug, Clone)]
pub struct SystemContent {
    pub text: String,
}

impl SystemContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Message in conversation
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

/// Content block in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        /// Name of the function being answered; Gemini matches responses by name
        name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text { text: s.into() }
    }

    pub fn tool_use(call: &ToolCall) -> Self {
        ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            name: name.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// Tool definition
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A structured request from the model to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Build a call with a freshly generated id (Gemini does not assign ids)
    pub fn generated(name: impl Into<String>, arguments: Value) -> Self {
        Self::new(
            format!("call_{}", uuid::Uuid::new_v4().simple()),
            name,
            arguments,
        )
    }
}

/// What the model decided to do with its turn
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// Plain text answer; the turn can end
    FinalReply { text: String },
    /// One or more tool invocations must happen before the model can answer
    ToolCallRequest { text: String, calls: Vec<ToolCall> },
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub end_turn: bool,
    pub usage: Usage,
}

impl LlmResponse {
    /// Extract all tool use requests from the response
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some(ToolCall::new(id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Get text content from the response
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Classify the response. The branch depends only on the presence of tool calls.
    pub fn turn(&self) -> ModelTurn {
        let calls = self.tool_calls();
        if calls.is_empty() {
            ModelTurn::FinalReply { text: self.text() }
        } else {
            ModelTurn::ToolCallRequest {
                text: self.text(),
                calls,
            }
        }
    }
}

/// Usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Incremental piece of a streamed model response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Text(String),
    ToolCall(ToolCall),
    Usage(Usage),
    Finish { end_turn: bool },
}

/// Folds a stream of deltas back into a complete response
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    calls: Vec<ToolCall>,
    usage: Usage,
    end_turn: bool,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: StreamDelta) {
        match delta {
            StreamDelta::Text(text) => self.text.push_str(&text),
            StreamDelta::ToolCall(call) => self.calls.push(call),
            // Gemini reports cumulative usage on every chunk; keep the latest
            StreamDelta::Usage(usage) => self.usage = usage,
            StreamDelta::Finish { end_turn } => self.end_turn = end_turn,
        }
    }

    pub fn finish(self) -> LlmResponse {
        let mut content = Vec::with_capacity(self.calls.len() + 1);
        if !self.text.is_empty() {
            content.push(ContentBlock::Text { text: self.text });
        }
        content.extend(self.calls.iter().map(ContentBlock::tool_use));
        LlmResponse {
            content,
            end_turn: self.end_turn,
            usage: self.usage,
        }
    }
}
