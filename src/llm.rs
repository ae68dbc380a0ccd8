//! LLM provider abstraction
//!
//! Provides a common interface for the hosted language model.

mod error;
mod gemini;
mod models;
mod registry;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use gemini::GeminiService;
pub use registry::{LlmConfig, ModelRegistry};
pub use types::*;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Instant;

/// Incremental model output. Finite and not restartable.
pub type LlmStream = BoxStream<'static, Result<StreamDelta, LlmError>>;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Make a streaming completion request.
    ///
    /// The default implementation performs a full completion and replays it
    /// as a single burst of deltas.
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        let response = self.complete(request).await?;
        Ok(replay_response(response))
    }

    /// Get the model ID
    fn model_id(&self) -> &str;

    /// Get the context window size in tokens
    fn context_window(&self) -> usize;
}

/// Turn a complete response into the delta sequence a stream would have produced
pub fn replay_response(response: LlmResponse) -> LlmStream {
    let mut deltas = Vec::with_capacity(response.content.len() + 2);
    for block in response.content {
        match block {
            ContentBlock::Text { text } => deltas.push(Ok(StreamDelta::Text(text))),
            ContentBlock::ToolUse { id, name, input } => {
                deltas.push(Ok(StreamDelta::ToolCall(ToolCall::new(id, name, input))));
            }
            ContentBlock::ToolResult { .. } => {}
        }
    }
    deltas.push(Ok(StreamDelta::Usage(response.usage)));
    deltas.push(Ok(StreamDelta::Finish {
        end_turn: response.end_turn,
    }));
    stream::iter(deltas).boxed()
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        let start = Instant::now();
        let model_id = self.model_id.clone();

        match self.inner.stream(request).await {
            Ok(inner) => {
                tracing::debug!(model = %model_id, "LLM stream opened");
                let logged = inner.inspect(move |item| match item {
                    Ok(StreamDelta::Finish { end_turn }) => {
                        tracing::info!(
                            model = %model_id,
                            duration_ms = %start.elapsed().as_millis(),
                            end_turn,
                            "LLM stream completed"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            model = %model_id,
                            duration_ms = %start.elapsed().as_millis(),
                            error = %e.message,
                            kind = e.kind.as_str(),
                            "LLM stream failed"
                        );
                    }
                    Ok(_) => {}
                });
                Ok(logged.boxed())
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    "LLM stream request failed"
                );
                Err(e)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn context_window(&self) -> usize {
        self.inner.context_window()
    }
}
