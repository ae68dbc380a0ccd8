//! API request and response types

use crate::db::{ChatMessage, ThreadSummary};
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Response for thread creation
#[derive(Debug, Serialize, Deserialize)]
pub struct NewThreadResponse {
    pub thread_id: String,
}

/// Response with a list of threads
#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub threads: Vec<ThreadSummary>,
}

/// Response with a thread's history
#[derive(Debug, Serialize)]
pub struct ThreadMessagesResponse {
    pub thread_id: String,
    pub messages: Vec<ChatMessage>,
    /// A turn is currently running on this thread
    pub busy: bool,
}

/// Model information with metadata
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub description: String,
    pub context_window: usize,
}

/// Response for model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub default: String,
    /// Whether a model credential is configured
    pub credentials: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
