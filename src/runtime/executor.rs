//! Conversation graph engine

use super::traits::{ModelClient, StoreError, ThreadStore, ToolExecutor};
use super::{ActiveTurns, GraphError, TurnEvent, TurnStream};

use crate::db::{ChatMessage, Checkpoint, MessagePayload, Role, ThreadSnapshot, ThreadSummary};
use crate::llm::{
    ContentBlock, LlmMessage, LlmRequest, MessageRole, ResponseAccumulator, StreamDelta,
    SystemContent, ToolCall,
};
use crate::state_machine::{
    transition, Effect, Event, GraphContext, GraphState, ToolOutcome, DEFAULT_MAX_TOOL_CYCLES,
};
use crate::system_prompt::build_system_prompt;
use crate::tools::ToolContext;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Buffered turn events before the producer waits for the consumer
const EVENT_BUFFER: usize = 64;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tool cycles allowed per turn
    pub max_tool_cycles: u32,
    /// Output token limit per model call
    pub max_tokens: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_cycles: DEFAULT_MAX_TOOL_CYCLES,
            max_tokens: Some(8192),
        }
    }
}

/// Drives conversation turns against a store, a model and a tool set
pub struct GraphEngine<S, M, T>
where
    S: ThreadStore + 'static,
    M: ModelClient + 'static,
    T: ToolExecutor + 'static,
{
    store: Arc<S>,
    model: Arc<M>,
    tools: Arc<T>,
    config: EngineConfig,
    active: ActiveTurns,
}

impl<S, M, T> GraphEngine<S, M, T>
where
    S: ThreadStore + 'static,
    M: ModelClient + 'static,
    T: ToolExecutor + 'static,
{
    pub fn new(store: S, model: M, tools: T, config: EngineConfig) -> Self {
        Self {
            store: Arc::new(store),
            model: Arc::new(model),
            tools: Arc::new(tools),
            config,
            active: ActiveTurns::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Create a fresh, empty thread and return its id
    pub async fn start_new_thread(&self) -> Result<String, GraphError> {
        let thread_id = uuid::Uuid::new_v4().to_string();
        self.store.create_thread(&thread_id).await?;
        tracing::info!(thread_id = %thread_id, "Started new thread");
        Ok(thread_id)
    }

    /// Ordered history of a thread; empty for unknown ids
    pub async fn load_thread_history(&self, thread_id: &str) -> Result<Vec<ChatMessage>, GraphError> {
        match self.store.load(thread_id).await {
            Ok(snapshot) => Ok(snapshot.history),
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_thread_ids(&self) -> Result<Vec<String>, GraphError> {
        Ok(self.store.list_thread_ids().await?)
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadSummary>, GraphError> {
        Ok(self.store.list_threads().await?)
    }

    /// Whether a turn is currently running on this thread
    pub fn is_busy(&self, thread_id: &str) -> bool {
        self.active.is_active(thread_id)
    }

    /// Run one turn for `thread_id` with the given user text.
    ///
    /// The turn runs on its own task and always finishes, even if the
    /// returned stream is dropped.
    pub fn run(&self, thread_id: &str, text: impl Into<String>) -> TurnStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        match self.active.try_acquire(thread_id) {
            None => {
                tracing::warn!(thread_id = %thread_id, "Rejected message for busy thread");
                let _ = tx.try_send(Err(GraphError::ThreadBusy));
            }
            Some(guard) => {
                let turn = Turn {
                    context: GraphContext::new(thread_id, self.config.max_tool_cycles),
                    max_tokens: self.config.max_tokens,
                    store: Arc::clone(&self.store),
                    model: Arc::clone(&self.model),
                    tools: Arc::clone(&self.tools),
                    tx,
                    state: GraphState::Done,
                    step: 0,
                    history: Vec::new(),
                    start: Checkpoint::default(),
                    checkpoint_written: false,
                };
                let text = text.into();
                tokio::spawn(async move {
                    let _guard = guard;
                    turn.drive(text).await;
                });
            }
        }

        ReceiverStream::new(rx).boxed()
    }
}

/// State of one in-flight turn
struct Turn<S, M, T> {
    context: GraphContext,
    max_tokens: Option<u32>,
    store: Arc<S>,
    model: Arc<M>,
    tools: Arc<T>,
    tx: mpsc::Sender<Result<TurnEvent, GraphError>>,
    state: GraphState,
    step: u64,
    /// Prior history plus everything appended during this turn
    history: Vec<ChatMessage>,
    /// Checkpoint the turn started from, restored on failure
    start: Checkpoint,
    checkpoint_written: bool,
}

impl<S, M, T> Turn<S, M, T>
where
    S: ThreadStore,
    M: ModelClient,
    T: ToolExecutor,
{
    async fn drive(mut self, text: String) {
        let thread_id = self.context.thread_id.clone();
        tracing::info!(thread_id = %thread_id, "Starting turn");

        if let Err(e) = self.execute(text).await {
            tracing::warn!(
                thread_id = %thread_id,
                state = self.state.name(),
                kind = e.kind(),
                error = %e,
                "Turn aborted"
            );
            self.restore_start().await;
            self.emit(Err(e)).await;
        }
    }

    async fn execute(&mut self, text: String) -> Result<(), GraphError> {
        let snapshot = match self.store.load(&self.context.thread_id).await {
            Ok(snapshot) => snapshot,
            Err(StoreError::NotFound(_)) => ThreadSnapshot::default(),
            Err(e) => return Err(e.into()),
        };
        self.start = snapshot.checkpoint.clone();
        self.state = snapshot.checkpoint.state;
        self.step = snapshot.checkpoint.step;
        self.history = snapshot.history;

        let mut pending = VecDeque::from([Event::UserMessage { text }]);
        while let Some(event) = pending.pop_front() {
            tracing::debug!(
                thread_id = %self.context.thread_id,
                state = self.state.name(),
                event = event.name(),
                "Processing event"
            );
            if let Event::ModelResponse { usage, .. } = &event {
                tracing::debug!(
                    thread_id = %self.context.thread_id,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    total_tokens = usage.total(),
                    "Model usage"
                );
            }
            let result = transition(&self.state, &self.context, event)?;
            self.state = result.new_state;
            self.step += 1;

            for effect in result.effects {
                if let Some(next) = self.execute_effect(effect).await? {
                    pending.push_back(next);
                }
            }
        }
        Ok(())
    }

    async fn execute_effect(&mut self, effect: Effect) -> Result<Option<Event>, GraphError> {
        match effect {
            Effect::AppendMessage(msg) => {
                self.history.push(msg);
                Ok(None)
            }

            Effect::Checkpoint => {
                let checkpoint = Checkpoint::new(self.step, self.state.clone());
                self.store
                    .put_checkpoint(&self.context.thread_id, &checkpoint)
                    .await?;
                self.checkpoint_written = true;
                Ok(None)
            }

            Effect::RequestModel => self.request_model().await.map(Some),

            Effect::InvokeTool { call } => self.invoke_tool(call).await.map(Some),

            Effect::Commit { reply } => {
                let checkpoint = Checkpoint::new(self.step, self.state.clone());
                self.store
                    .save(&self.context.thread_id, &self.history, &checkpoint)
                    .await?;
                tracing::info!(
                    thread_id = %self.context.thread_id,
                    step = self.step,
                    messages = self.history.len(),
                    "Turn committed"
                );
                self.emit(Ok(TurnEvent::Done {
                    reply,
                    step: self.step,
                }))
                .await;
                Ok(None)
            }
        }
    }

    async fn request_model(&mut self) -> Result<Event, GraphError> {
        let tools = self.tools.definitions();
        let request = LlmRequest {
            system: vec![SystemContent::new(build_system_prompt(
                chrono::Local::now().date_naive(),
                &tools,
            ))],
            messages: build_llm_messages(&self.history),
            tools,
            max_tokens: self.max_tokens,
        };

        let mut stream = self.model.stream(&request).await?;
        let mut accumulator = ResponseAccumulator::new();
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if let StreamDelta::Text(text) = &delta {
                if !text.is_empty() {
                    self.emit(Ok(TurnEvent::Delta { text: text.clone() })).await;
                }
            }
            accumulator.push(delta);
        }

        let response = accumulator.finish();
        Ok(Event::ModelResponse {
            turn: response.turn(),
            usage: response.usage,
        })
    }

    async fn invoke_tool(&mut self, call: ToolCall) -> Result<Event, GraphError> {
        self.emit(Ok(TurnEvent::ToolCall { call: call.clone() })).await;

        let ctx = ToolContext::new(self.context.thread_id.clone());
        match self
            .tools
            .execute(&call.name, call.arguments.clone(), ctx)
            .await
        {
            Ok(output) => {
                let outcome = ToolOutcome::success(&call, output);
                self.emit(Ok(tool_result_event(&outcome))).await;
                Ok(Event::ToolComplete { outcome })
            }
            Err(e) => {
                let outcome = ToolOutcome::error(&call, e.to_string());
                self.emit(Ok(tool_result_event(&outcome))).await;
                Err(e.into())
            }
        }
    }

    /// Put back the checkpoint the turn started from
    async fn restore_start(&self) {
        if !self.checkpoint_written {
            return;
        }
        if let Err(e) = self
            .store
            .put_checkpoint(&self.context.thread_id, &self.start)
            .await
        {
            tracing::error!(thread_id = %self.context.thread_id, error = %e, "Failed to restore checkpoint");
        }
    }

    async fn emit(&self, event: Result<TurnEvent, GraphError>) {
        // Receiver gone means the client went away; the turn still completes
        let _ = self.tx.send(event).await;
    }
}

fn tool_result_event(outcome: &ToolOutcome) -> TurnEvent {
    TurnEvent::ToolResult {
        call_id: outcome.call_id.clone(),
        name: outcome.name.clone(),
        output: outcome.output.clone(),
        is_error: outcome.is_error,
    }
}

/// Translate a stored history into model messages.
///
/// Consecutive tool answers are grouped into a single user message.
pub(crate) fn build_llm_messages(history: &[ChatMessage]) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = Vec::with_capacity(history.len());

    for msg in history {
        match msg.role {
            Role::User => {
                if !msg.content.is_empty() {
                    messages.push(LlmMessage {
                        role: MessageRole::User,
                        content: vec![ContentBlock::text(&msg.content)],
                    });
                }
            }
            Role::Assistant => {
                let mut content = Vec::new();
                if !msg.content.is_empty() {
                    content.push(ContentBlock::text(&msg.content));
                }
                content.extend(msg.tool_calls().iter().map(ContentBlock::tool_use));
                if !content.is_empty() {
                    messages.push(LlmMessage {
                        role: MessageRole::Assistant,
                        content,
                    });
                }
            }
            Role::Tool => {
                let Some(MessagePayload::ToolResult {
                    call_id,
                    name,
                    is_error,
                }) = &msg.payload
                else {
                    continue;
                };
                let block = ContentBlock::tool_result(call_id, name, &msg.content, *is_error);

                match messages.last_mut() {
                    Some(last)
                        if last.role == MessageRole::User
                            && last
                                .content
                                .iter()
                                .all(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                    {
                        last.content.push(block);
                    }
                    _ => messages.push(LlmMessage {
                        role: MessageRole::User,
                        content: vec![block],
                    }),
                }
            }
        }
    }

    messages
}
