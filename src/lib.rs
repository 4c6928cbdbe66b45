//! companion-orchestrator: client-side orchestration for a real-time voice
//! companion
//!
//! Holds the agent activity state, routes backend messages, plays response
//! audio strictly in order, listens for a wake phrase while the microphone
//! is off and keeps the backend WebSocket connection.

pub mod audio;
pub mod config;
pub mod console;
pub mod events;
pub mod lifecycle;
pub mod mic;
pub mod notify;
pub mod proactive;
pub mod router;
pub mod session;
pub mod state;
pub mod stt;
pub mod transport;
pub mod wake;

#[cfg(test)]
mod testing;
