//! State machine module for agent activity
//!
//! Provides an explicit state machine with six states:
//! - Idle: ready for input
//! - ThinkingSpeaking: the agent is producing a response, can be interrupted
//! - Interrupted: the current response was cut off
//! - Loading: initial load or character switch (initial state)
//! - Listening: user speech detected
//! - Waiting: user is typing, reverts to Idle after two seconds

mod machine;

pub use machine::{AgentState, AiStateMachine, WAITING_TIMEOUT};
