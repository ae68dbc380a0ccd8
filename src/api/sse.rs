//! Server-Sent Events support

use crate::runtime::{GraphError, TurnEvent, TurnStream};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;

/// Convert a turn stream to an SSE response
pub fn turn_sse(turn: TurnStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = turn.map(|item| {
        let (event_type, data) = match item {
            Ok(event) => turn_event_payload(event),
            Err(e) => error_payload(&e),
        };
        Ok(Event::default().event(event_type).data(data.to_string()))
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn turn_event_payload(event: TurnEvent) -> (&'static str, Value) {
    match event {
        TurnEvent::Delta { text } => ("delta", json!({ "type": "delta", "text": text })),
        TurnEvent::ToolCall { call } => (
            "tool_call",
            json!({
                "type": "tool_call",
                "call_id": call.id,
                "name": call.name,
                "arguments": call.arguments
            }),
        ),
        TurnEvent::ToolResult {
            call_id,
            name,
            output,
            is_error,
        } => (
            "tool_result",
            json!({
                "type": "tool_result",
                "call_id": call_id,
                "name": name,
                "output": output,
                "is_error": is_error
            }),
        ),
        TurnEvent::Done { reply, step } => (
            "done",
            json!({ "type": "done", "reply": reply, "step": step }),
        ),
    }
}

fn error_payload(e: &GraphError) -> (&'static str, Value) {
    (
        "error",
        json!({
            "type": "error",
            "kind": e.kind(),
            "message": e.to_string(),
            "retryable": e.is_retryable(),
            "retry_after_secs": e.retry_after_secs()
        }),
    )
}
