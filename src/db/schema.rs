//! Database schema and types

use crate::llm::ToolCall;
pub use crate::state_machine::state::GraphState;
use crate::state_machine::ToolOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SQL schema for initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_updated ON threads(updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    message_id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    payload TEXT,
    created_at TEXT NOT NULL,

    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE,
    UNIQUE (thread_id, sequence_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, sequence_id);

CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id TEXT PRIMARY KEY,
    step INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT '{"type":"done"}',
    updated_at TEXT NOT NULL,

    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
);
"#;

/// Maximum characters of the first user message used as a thread title
pub const TITLE_MAX_CHARS: usize = 60;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Structured data attached to assistant and tool messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Tool invocations requested by the model
    ToolCalls { calls: Vec<ToolCall> },
    /// Answer to one tool invocation
    ToolResult {
        call_id: String,
        name: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A single entry in a conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessagePayload>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            payload: None,
        }
    }

    pub fn assistant(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            payload: (!calls.is_empty()).then_some(MessagePayload::ToolCalls { calls }),
        }
    }

    pub fn tool(outcome: ToolOutcome) -> Self {
        Self {
            role: Role::Tool,
            content: outcome.output,
            payload: Some(MessagePayload::ToolResult {
                call_id: outcome.call_id,
                name: outcome.name,
                is_error: outcome.is_error,
            }),
        }
    }

    /// Tool calls requested by this message, if any
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.payload {
            Some(MessagePayload::ToolCalls { calls }) => calls,
            _ => &[],
        }
    }
}

/// The current position of a thread in the conversation graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Checkpoint {
    /// Monotonic step counter, incremented after every graph step
    pub step: u64,
    pub state: GraphState,
}

impl Checkpoint {
    pub fn new(step: u64, state: GraphState) -> Self {
        Self { step, state }
    }
}

/// Everything stored for one thread
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThreadSnapshot {
    pub history: Vec<ChatMessage>,
    pub checkpoint: Checkpoint,
}

/// Sidebar entry for a thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadSummary {
    pub id: String,
    pub title: Option<String>,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derive a display title from the first user message
pub fn title_from(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut title: String = line.chars().take(TITLE_MAX_CHARS).collect();
    if line.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    Some(title)
}
