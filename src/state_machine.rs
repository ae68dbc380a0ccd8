//! Conversation graph state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::Event;
pub use state::{GraphContext, GraphState, ToolOutcome, DEFAULT_MAX_TOOL_CYCLES};
pub use transition::{transition, TransitionError};
