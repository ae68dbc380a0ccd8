//! Pure state transition function

use super::{Effect, Event, GraphContext, GraphState};
use crate::db::ChatMessage;
use crate::llm::ModelTurn;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: GraphState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: GraphState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Thread is busy with another turn")]
    ThreadBusy,
    #[error("Tool loop exceeded {max} cycles")]
    ToolLoopExceeded { max: u32 },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
pub fn transition(
    state: &GraphState,
    context: &GraphContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // Done + UserMessage -> AwaitingModel
        (GraphState::Done, Event::UserMessage { text }) => {
            Ok(TransitionResult::new(GraphState::AwaitingModel { cycle: 0 })
                .with_effect(Effect::AppendMessage(ChatMessage::user(text)))
                .with_effect(Effect::Checkpoint)
                .with_effect(Effect::RequestModel))
        }

        (GraphState::AwaitingModel { .. } | GraphState::AwaitingTool { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::ThreadBusy)
        }

        // AwaitingModel + final reply -> Done
        (
            GraphState::AwaitingModel { .. },
            Event::ModelResponse {
                turn: ModelTurn::FinalReply { text },
                ..
            },
        ) => Ok(TransitionResult::new(GraphState::Done)
            .with_effect(Effect::AppendMessage(ChatMessage::assistant(
                text.clone(),
                Vec::new(),
            )))
            .with_effect(Effect::Commit { reply: text })),

        // AwaitingModel + tool calls -> AwaitingTool, bounded by the cycle cap
        (
            GraphState::AwaitingModel { cycle },
            Event::ModelResponse {
                turn: ModelTurn::ToolCallRequest { text, calls },
                ..
            },
        ) => {
            if *cycle >= context.max_tool_cycles {
                return Err(TransitionError::ToolLoopExceeded {
                    max: context.max_tool_cycles,
                });
            }
            let mut pending = calls.clone().into_iter();
            let Some(first) = pending.next() else {
                return Err(TransitionError::InvalidTransition(
                    "tool call request without calls".to_string(),
                ));
            };

            Ok(TransitionResult::new(GraphState::AwaitingTool {
                cycle: cycle + 1,
                current: first.clone(),
                remaining: pending.collect(),
                completed: vec![],
            })
            .with_effect(Effect::AppendMessage(ChatMessage::assistant(text, calls)))
            .with_effect(Effect::Checkpoint)
            .with_effect(Effect::invoke_tool(first)))
        }

        // AwaitingTool + ToolComplete -> next tool, or back to the model
        (
            GraphState::AwaitingTool {
                cycle,
                current,
                remaining,
                completed,
            },
            Event::ToolComplete { outcome },
        ) if outcome.call_id == current.id => {
            let mut completed = completed.clone();
            completed.push(outcome);

            if let Some((next, rest)) = remaining.split_first() {
                return Ok(TransitionResult::new(GraphState::AwaitingTool {
                    cycle: *cycle,
                    current: next.clone(),
                    remaining: rest.to_vec(),
                    completed,
                })
                .with_effect(Effect::Checkpoint)
                .with_effect(Effect::invoke_tool(next.clone())));
            }

            Ok(
                TransitionResult::new(GraphState::AwaitingModel { cycle: *cycle })
                    .with_effects(
                        completed
                            .into_iter()
                            .map(|o| Effect::AppendMessage(ChatMessage::tool(o))),
                    )
                    .with_effect(Effect::Checkpoint)
                    .with_effect(Effect::RequestModel),
            )
        }

        (state @ GraphState::AwaitingTool { .. }, Event::ToolComplete { outcome }) => {
            Err(TransitionError::InvalidTransition(format!(
                "result for {} while waiting on {:?}",
                outcome.call_id,
                state.pending_call_ids()
            )))
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{} in state {}",
            event.name(),
            state.name()
        ))),
    }
}
