//! The shared microphone flag
//!
//! Both the user and the wake-word detector flip it, so every consumer
//! re-reads it right before acting instead of caching it.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::events::Event;
use crate::state::{AgentState, AiStateMachine};

/// Process-wide mic on/off flag with change notification
#[derive(Clone)]
pub struct MicSwitch {
    tx: Arc<watch::Sender<bool>>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl MicSwitch {
    /// A switch that starts off
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            event_tx: None,
        }
    }

    /// Also publish [`Event::MicChanged`] on every flip
    pub fn with_events(event_tx: broadcast::Sender<Event>) -> Self {
        let mut mic = Self::new();
        mic.event_tx = Some(event_tx);
        mic
    }

    pub fn is_on(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn start(&self) {
        self.set(true);
    }

    pub fn stop(&self) {
        self.set(false);
    }

    /// Follow on/off transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn set(&self, on: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == on {
                return false;
            }
            *current = on;
            true
        });
        if !changed {
            return;
        }

        info!(on, "microphone switched");
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(Event::MicChanged { on });
        }
    }
}

impl Default for MicSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// Toggle used by wake-word activation and the end-phrase stop
#[derive(Clone)]
pub struct MicToggle {
    mic: MicSwitch,
    state: AiStateMachine,
}

impl MicToggle {
    pub fn new(mic: MicSwitch, state: AiStateMachine) -> Self {
        Self { mic, state }
    }

    /// Stop a running mic (dropping out of `Listening`) or start a stopped one
    pub fn toggle(&self) {
        if self.mic.is_on() {
            self.mic.stop();
            self.state
                .compare_and_set(|s| s == AgentState::Listening, AgentState::Idle);
        } else {
            self.mic.start();
        }
    }

    pub fn mic(&self) -> &MicSwitch {
        &self.mic
    }
}
