//! Mock implementations for testing
//!
//! These mocks enable end-to-end turn tests without real I/O.

use super::traits::*;
use super::{EngineConfig, GraphEngine, GraphError, TurnEvent, TurnStream};
use crate::db::{ChatMessage, Checkpoint, ThreadSnapshot, ThreadSummary};
use crate::llm::{
    replay_response, ContentBlock, LlmError, LlmRequest, LlmResponse, LlmStream, ToolCall,
    ToolDefinition, Usage,
};
use crate::tools::{ToolContext, ToolError};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock Model Client
// ============================================================================

/// Mock model client that returns queued responses
pub struct MockModelClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockModelClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a plain text answer
    pub fn queue_text(&self, text: &str) {
        self.queue_response(LlmResponse {
            content: vec![ContentBlock::text(text)],
            end_turn: true,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        });
    }

    /// Queue a request for the given tool calls
    pub fn queue_tool_calls(&self, calls: &[ToolCall]) {
        self.queue_response(LlmResponse {
            content: calls.iter().map(ContentBlock::tool_use).collect(),
            end_turn: false,
            usage: Usage::default(),
        });
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Number of model invocations so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn invoke(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.next_response(request)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        self.next_response(request).map(replay_response)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

/// Mock tool executor with predefined outputs
pub struct MockToolExecutor {
    outputs: HashMap<String, Result<String, ToolError>>,
    definitions: Vec<ToolDefinition>,
    /// Record of tool executions
    pub executions: Mutex<Vec<(String, Value)>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            definitions: Vec::new(),
            executions: Mutex::new(Vec::new()),
        }
    }

    /// Add a tool with a predefined result
    pub fn with_tool(mut self, name: impl Into<String>, output: Result<String, ToolError>) -> Self {
        let name = name.into();
        self.definitions.push(ToolDefinition {
            name: name.clone(),
            description: format!("Mock {name}"),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        });
        self.outputs.insert(name, output);
        self
    }

    /// Get recorded executions
    pub fn recorded_executions(&self) -> Vec<(String, Value)> {
        self.executions.lock().unwrap().clone()
    }
}

impl Default for MockToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, name: &str, input: Value, _ctx: ToolContext) -> Result<String, ToolError> {
        self.executions
            .lock()
            .unwrap()
            .push((name.to_string(), input));
        self.outputs
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(ToolError::UnknownTool(name.to_string())))
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory thread store
#[derive(Default)]
pub struct InMemoryStore {
    threads: Mutex<HashMap<String, (ThreadSnapshot, ThreadSummary)>>,
    /// Every checkpoint written, in order
    pub checkpoint_log: Mutex<Vec<(String, Checkpoint)>>,
    fail_saves: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `save` always fails
    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    /// Seed a thread with existing history
    pub fn seed(&self, thread_id: &str, history: Vec<ChatMessage>) {
        let checkpoint = Checkpoint::new(history.len() as u64, crate::db::GraphState::Done);
        self.threads.lock().unwrap().insert(
            thread_id.to_string(),
            (
                ThreadSnapshot {
                    history,
                    checkpoint,
                },
                summary(thread_id),
            ),
        );
    }

    /// Current snapshot of a thread, if it exists
    pub fn snapshot(&self, thread_id: &str) -> Option<ThreadSnapshot> {
        self.threads
            .lock()
            .unwrap()
            .get(thread_id)
            .map(|(s, _)| s.clone())
    }
}

fn summary(thread_id: &str) -> ThreadSummary {
    let now = Utc::now();
    ThreadSummary {
        id: thread_id.to_string(),
        title: None,
        message_count: 0,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl ThreadStore for InMemoryStore {
    async fn create_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        self.threads
            .lock()
            .unwrap()
            .entry(thread_id.to_string())
            .or_insert_with(|| (ThreadSnapshot::default(), summary(thread_id)));
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<ThreadSnapshot, StoreError> {
        self.snapshot(thread_id)
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))
    }

    async fn save(
        &self,
        thread_id: &str,
        history: &[ChatMessage],
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        if self.fail_saves {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        let mut threads = self.threads.lock().unwrap();
        let entry = threads
            .entry(thread_id.to_string())
            .or_insert_with(|| (ThreadSnapshot::default(), summary(thread_id)));
        entry.0 = ThreadSnapshot {
            history: history.to_vec(),
            checkpoint: checkpoint.clone(),
        };
        entry.1.message_count = history.len() as i64;
        entry.1.updated_at = Utc::now();
        Ok(())
    }

    async fn put_checkpoint(
        &self,
        thread_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        self.checkpoint_log
            .lock()
            .unwrap()
            .push((thread_id.to_string(), checkpoint.clone()));
        let mut threads = self.threads.lock().unwrap();
        let entry = threads
            .entry(thread_id.to_string())
            .or_insert_with(|| (ThreadSnapshot::default(), summary(thread_id)));
        entry.0.checkpoint = checkpoint.clone();
        Ok(())
    }

    async fn list_thread_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_threads()
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, StoreError> {
        let mut threads: Vec<_> = self
            .threads
            .lock()
            .unwrap()
            .values()
            .map(|(_, s)| s.clone())
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(threads)
    }
}

// ============================================================================
// Test Engine
// ============================================================================

pub type TestEngine =
    GraphEngine<Arc<InMemoryStore>, Arc<MockModelClient>, Arc<MockToolExecutor>>;

/// Build an engine sharing its mocks with the caller
pub fn test_engine(
    store: &Arc<InMemoryStore>,
    model: &Arc<MockModelClient>,
    tools: &Arc<MockToolExecutor>,
    max_tool_cycles: u32,
) -> TestEngine {
    GraphEngine::new(
        Arc::clone(store),
        Arc::clone(model),
        Arc::clone(tools),
        EngineConfig {
            max_tool_cycles,
            max_tokens: Some(1024),
        },
    )
}

/// Drain a turn stream
pub async fn collect_turn(stream: TurnStream) -> Vec<Result<TurnEvent, GraphError>> {
    stream.collect().await
}

/// Final reply of a collected turn, if it committed
pub fn final_reply(events: &[Result<TurnEvent, GraphError>]) -> Option<&str> {
    events.iter().find_map(|e| match e {
        Ok(TurnEvent::Done { reply, .. }) => Some(reply.as_str()),
        _ => None,
    })
}

/// Error that ended a collected turn, if any
pub fn turn_error(events: &[Result<TurnEvent, GraphError>]) -> Option<&GraphError> {
    events.iter().find_map(|e| e.as_ref().err())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{GraphState, Role};
    use crate::llm::LlmErrorKind;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        model: Arc<MockModelClient>,
        tools: Arc<MockToolExecutor>,
        engine: TestEngine,
    }

    fn fixture(tools: MockToolExecutor, max_tool_cycles: u32) -> Fixture {
        fixture_with_store(InMemoryStore::new(), tools, max_tool_cycles)
    }

    fn fixture_with_store(store: InMemoryStore, tools: MockToolExecutor, max_tool_cycles: u32) -> Fixture {
        let store = Arc::new(store);
        let model = Arc::new(MockModelClient::new("mock-model"));
        let tools = Arc::new(tools);
        let engine = test_engine(&store, &model, &tools, max_tool_cycles);
        Fixture {
            store,
            model,
            tools,
            engine,
        }
    }

    fn search_tools() -> MockToolExecutor {
        MockToolExecutor::new().with_tool(
            "web_search",
            Ok("1. Markets rally on rate news — Stocks rose sharply (https://news.example)".to_string()),
        )
    }

    fn search_call(id: &str) -> ToolCall {
        ToolCall::new(id, "web_search", json!({"query": "today's top news headline"}))
    }

    #[tokio::test]
    async fn test_mock_model_client() {
        let mock = MockModelClient::new("test-model");
        mock.queue_text("Hello");

        let request = LlmRequest {
            system: vec![],
            messages: vec![],
            tools: vec![],
            max_tokens: Some(100),
        };

        let response = mock.invoke(&request).await.unwrap();
        assert_eq!(response.text(), "Hello");
        assert!(response.end_turn);

        // Second call should fail (no more responses)
        assert!(mock.invoke(&request).await.is_err());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_tool_executor() {
        let executor = search_tools();
        let result = executor
            .execute("web_search", json!({"query": "x"}), ToolContext::new("t"))
            .await;
        assert!(result.is_ok());

        let result = executor
            .execute("unknown", json!({}), ToolContext::new("t"))
            .await;
        assert_eq!(result, Err(ToolError::UnknownTool("unknown".to_string())));
        assert_eq!(executor.recorded_executions().len(), 2);
    }

    /// "What is 2+2?" is answered without tools in one model call
    #[tokio::test]
    async fn test_direct_answer() {
        let fx = fixture(search_tools(), 5);
        fx.model.queue_text("2 + 2 = 4.");

        let events = collect_turn(fx.engine.run("t1", "What is 2+2?")).await;

        assert_eq!(final_reply(&events), Some("2 + 2 = 4."));
        assert!(turn_error(&events).is_none());
        assert!(events
            .iter()
            .any(|e| matches!(e, Ok(TurnEvent::Delta { text }) if text == "2 + 2 = 4.")));
        assert_eq!(fx.model.call_count(), 1);
        assert!(fx.tools.recorded_executions().is_empty());

        let history = fx.engine.load_thread_history("t1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ChatMessage::user("What is 2+2?"));
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "2 + 2 = 4.");

        let snapshot = fx.store.snapshot("t1").unwrap();
        assert_eq!(snapshot.checkpoint.state, GraphState::Done);
    }

    /// A news question goes through exactly one tool cycle
    #[tokio::test]
    async fn test_single_tool_cycle() {
        let fx = fixture(search_tools(), 5);
        fx.model.queue_tool_calls(&[search_call("call-1")]);
        fx.model.queue_text("Markets rallied today on rate news.");

        let events = collect_turn(fx.engine.run("t1", "What is today's top news headline?")).await;

        assert_eq!(
            final_reply(&events),
            Some("Markets rallied today on rate news.")
        );
        assert_eq!(fx.model.call_count(), 2);
        assert_eq!(fx.tools.recorded_executions().len(), 1);

        let kinds: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Ok(TurnEvent::ToolCall { .. }) => Some("tool_call"),
                Ok(TurnEvent::ToolResult { .. }) => Some("tool_result"),
                Ok(TurnEvent::Done { .. }) => Some("done"),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["tool_call", "tool_result", "done"]);

        let history = fx.engine.load_thread_history("t1").await.unwrap();
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert!(history[2].content.contains("Markets rally"));

        // The second model call saw the tool answer
        let second = &fx.model.recorded_requests()[1];
        assert!(second.messages.iter().any(|m| m
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call-1"))));
    }

    #[tokio::test]
    async fn test_multiple_calls_in_one_cycle() {
        let fx = fixture(search_tools(), 1);
        fx.model
            .queue_tool_calls(&[search_call("a"), search_call("b")]);
        fx.model.queue_text("Two sources agree.");

        let events = collect_turn(fx.engine.run("t1", "Compare headlines")).await;

        assert_eq!(final_reply(&events), Some("Two sources agree."));
        assert_eq!(fx.tools.recorded_executions().len(), 2);
        let history = fx.engine.load_thread_history("t1").await.unwrap();
        assert_eq!(history.iter().filter(|m| m.role == Role::Tool).count(), 2);
    }

    /// Model failures abort the turn and leave history untouched
    #[tokio::test]
    async fn test_model_unavailable_keeps_history() {
        let fx = fixture(search_tools(), 5);
        fx.store.seed(
            "t1",
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello", vec![])],
        );
        let before = fx.store.snapshot("t1").unwrap();
        fx.model.queue_error(LlmError::network("connection reset"));

        let events = collect_turn(fx.engine.run("t1", "What is 2+2?")).await;

        match turn_error(&events) {
            Some(GraphError::ModelUnavailable(e)) => assert_eq!(e.kind, LlmErrorKind::Network),
            other => panic!("expected ModelUnavailable, got {other:?}"),
        }
        assert!(final_reply(&events).is_none());
        assert_eq!(fx.store.snapshot("t1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_model_unavailable_on_new_thread() {
        let fx = fixture(search_tools(), 5);
        fx.model.queue_error(LlmError::auth("invalid key"));

        let events = collect_turn(fx.engine.run("fresh", "hello")).await;

        assert!(matches!(
            turn_error(&events),
            Some(GraphError::ModelUnavailable(_))
        ));
        assert!(fx.engine.load_thread_history("fresh").await.unwrap().is_empty());
    }

    /// A model that never stops asking for tools hits the cycle cap
    #[tokio::test]
    async fn test_tool_loop_cap() {
        let max = 3;
        let fx = fixture(search_tools(), max);
        for i in 0..=max {
            fx.model.queue_tool_calls(&[search_call(&format!("call-{i}"))]);
        }

        let events = collect_turn(fx.engine.run("t1", "loop forever")).await;

        assert!(matches!(
            turn_error(&events),
            Some(GraphError::ToolLoopExceeded { max: 3 })
        ));
        assert_eq!(fx.model.call_count(), (max + 1) as usize);
        assert_eq!(fx.tools.recorded_executions().len(), max as usize);
        assert!(fx.engine.load_thread_history("t1").await.unwrap().is_empty());
        assert_eq!(
            fx.store.snapshot("t1").unwrap().checkpoint,
            Checkpoint::default()
        );
    }

    #[tokio::test]
    async fn test_tool_error_aborts_turn() {
        let tools = MockToolExecutor::new().with_tool(
            "web_search",
            Err(ToolError::NoResults("obscure".to_string())),
        );
        let fx = fixture(tools, 5);
        fx.store.seed("t1", vec![ChatMessage::user("earlier"), ChatMessage::assistant("ok", vec![])]);
        fx.model.queue_tool_calls(&[search_call("c1")]);

        let events = collect_turn(fx.engine.run("t1", "search something obscure")).await;

        assert!(matches!(
            turn_error(&events),
            Some(GraphError::Tool(ToolError::NoResults(_)))
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            Ok(TurnEvent::ToolResult { is_error: true, .. })
        )));
        let snapshot = fx.store.snapshot("t1").unwrap();
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.checkpoint.state, GraphState::Done);
        assert_eq!(snapshot.checkpoint.step, 2);
    }

    #[tokio::test]
    async fn test_store_error_surfaces() {
        let fx = fixture_with_store(InMemoryStore::failing_saves(), search_tools(), 5);
        fx.model.queue_text("4");

        let events = collect_turn(fx.engine.run("t1", "What is 2+2?")).await;

        assert!(matches!(turn_error(&events), Some(GraphError::Store(_))));
        assert!(final_reply(&events).is_none());
        assert!(fx.engine.load_thread_history("t1").await.unwrap().is_empty());
    }

    /// Checkpoints are written after every intermediate step
    #[tokio::test]
    async fn test_checkpoints_follow_steps() {
        let fx = fixture(search_tools(), 5);
        fx.model.queue_tool_calls(&[search_call("c1")]);
        fx.model.queue_text("done");

        let events = collect_turn(fx.engine.run("t1", "news?")).await;
        assert_eq!(final_reply(&events), Some("done"));

        let log = fx.store.checkpoint_log.lock().unwrap().clone();
        let states: Vec<_> = log.iter().map(|(_, c)| c.state.name()).collect();
        assert_eq!(
            states,
            vec!["awaiting_model", "awaiting_tool", "awaiting_model"]
        );
        let steps: Vec<_> = log.iter().map(|(_, c)| c.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);

        let committed = fx.store.snapshot("t1").unwrap().checkpoint;
        assert_eq!(committed, Checkpoint::new(4, GraphState::Done));
        assert!(matches!(
            events.last(),
            Some(Ok(TurnEvent::Done { step: 4, .. }))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_turn_is_rejected() {
        let fx = fixture(search_tools(), 5);
        fx.model.queue_text("first");

        let first = fx.engine.run("t1", "one");
        let second = collect_turn(fx.engine.run("t1", "two")).await;
        assert!(matches!(
            second.as_slice(),
            [Err(GraphError::ThreadBusy)]
        ));

        let first = collect_turn(first).await;
        assert_eq!(final_reply(&first), Some("first"));
    }

    #[tokio::test]
    async fn test_turns_accumulate_history() {
        let fx = fixture(search_tools(), 5);
        fx.model.queue_text("4");
        fx.model.queue_text("6");

        collect_turn(fx.engine.run("t1", "2+2?")).await;
        collect_turn(fx.engine.run("t1", "3+3?")).await;

        let history = fx.engine.load_thread_history("t1").await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["2+2?", "4", "3+3?", "6"]);

        // Second call carried the full prior history
        assert_eq!(fx.model.recorded_requests()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_thread_history_is_empty_and_stable() {
        let fx = fixture(search_tools(), 5);
        assert!(fx.engine.load_thread_history("nope").await.unwrap().is_empty());

        fx.store.seed("t1", vec![ChatMessage::user("a"), ChatMessage::assistant("b", vec![])]);
        let first = fx.engine.load_thread_history("t1").await.unwrap();
        let second = fx.engine.load_thread_history("t1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_start_new_thread() {
        let fx = fixture(search_tools(), 5);
        let a = fx.engine.start_new_thread().await.unwrap();
        let b = fx.engine.start_new_thread().await.unwrap();
        assert_ne!(a, b);

        let ids = fx.engine.list_thread_ids().await.unwrap();
        assert!(ids.contains(&a) && ids.contains(&b));
        assert!(fx.engine.load_thread_history(&a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_stream_still_commits() {
        let fx = fixture(search_tools(), 5);
        fx.model.queue_text("saved anyway");

        drop(fx.engine.run("t1", "hello"));

        for _ in 0..100 {
            if !fx.engine.is_busy("t1") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let history = fx.engine.load_thread_history("t1").await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
