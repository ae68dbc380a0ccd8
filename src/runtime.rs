//! Runtime for executing conversation turns
//!
//! A turn is driven by a spawned task that applies the pure transition
//! function, performs the resulting effects and reports progress as a
//! stream of [`TurnEvent`]s.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{EngineConfig, GraphEngine};
pub use traits::*;

use crate::llm::{LlmError, ToolCall};
use crate::state_machine::TransitionError;
use crate::tools::ToolError;
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Type alias for the production engine with concrete implementations
pub type ProductionEngine = GraphEngine<DatabaseStore, RegistryModelClient, ToolRegistryExecutor>;

/// Progress of a running turn. Finite; a new turn needs a new `run`.
pub type TurnStream = BoxStream<'static, Result<TurnEvent, GraphError>>;

/// Events emitted while a turn runs
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Incremental assistant text
    Delta { text: String },
    /// The model asked for a tool; it is about to run
    ToolCall { call: ToolCall },
    /// A tool finished
    ToolResult {
        call_id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// The turn committed with this final reply
    Done { reply: String, step: u64 },
}

/// Failure of a turn. Nothing from the failed turn is persisted.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(#[from] LlmError),
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Tool loop exceeded {max} cycles")]
    ToolLoopExceeded { max: u32 },
    #[error("Thread is busy with another turn")]
    ThreadBusy,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

impl From<TransitionError> for GraphError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::ThreadBusy => GraphError::ThreadBusy,
            TransitionError::ToolLoopExceeded { max } => GraphError::ToolLoopExceeded { max },
            TransitionError::InvalidTransition(msg) => GraphError::InvalidTransition(msg),
        }
    }
}

impl GraphError {
    /// Stable machine-readable kind for clients
    pub fn kind(&self) -> &'static str {
        match self {
            GraphError::ModelUnavailable(_) => "model_unavailable",
            GraphError::Tool(_) => "tool_error",
            GraphError::Store(_) => "store_error",
            GraphError::ToolLoopExceeded { .. } => "tool_loop_exceeded",
            GraphError::ThreadBusy => "thread_busy",
            GraphError::InvalidTransition(_) => "invalid_transition",
        }
    }

    /// Whether sending the same message again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            GraphError::ModelUnavailable(e) => e.kind.is_retryable(),
            GraphError::Tool(e) => !matches!(e, ToolError::UnknownTool(_)),
            GraphError::ThreadBusy | GraphError::ToolLoopExceeded { .. } => true,
            GraphError::Store(_) | GraphError::InvalidTransition(_) => false,
        }
    }

    /// Provider-suggested wait before retrying, in whole seconds
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GraphError::ModelUnavailable(e) => e.retry_after.map(|d| d.as_secs()),
            _ => None,
        }
    }
}

/// Threads with a turn in flight in this process
#[derive(Debug, Clone, Default)]
pub struct ActiveTurns {
    threads: Arc<Mutex<HashSet<String>>>,
}

impl ActiveTurns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a thread; `None` when a turn is already running on it
    pub fn try_acquire(&self, thread_id: &str) -> Option<TurnGuard> {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        if !threads.insert(thread_id.to_string()) {
            return None;
        }
        Some(TurnGuard {
            threads: Arc::clone(&self.threads),
            thread_id: thread_id.to_string(),
        })
    }

    pub fn is_active(&self, thread_id: &str) -> bool {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(thread_id)
    }
}

/// Releases the thread when the turn ends
#[derive(Debug)]
pub struct TurnGuard {
    threads: Arc<Mutex<HashSet<String>>>,
    thread_id: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.thread_id);
    }
}
