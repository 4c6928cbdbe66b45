//! Proactive speech
//!
//! Once the agent has sat in `Idle` long enough, ask the backend to say
//! something. Fires at most once per idle period; any transition out of
//! `Idle` starts a new period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::Event;
use crate::state::{AgentState, AiStateMachine};
use crate::transport::{MessageSink, OutboundMessage};

pub struct ProactiveSpeaker {
    state: AiStateMachine,
    sink: Arc<dyn MessageSink>,
    idle_for: Duration,
}

impl ProactiveSpeaker {
    pub fn new(state: AiStateMachine, sink: Arc<dyn MessageSink>, idle_for: Duration) -> Self {
        Self { state, sink, idle_for }
    }

    /// Follow state changes on `events` until `cancel` fires
    pub fn spawn(self, events: broadcast::Receiver<Event>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(events, cancel))
    }

    async fn run(self, mut events: broadcast::Receiver<Event>, cancel: CancellationToken) {
        info!(idle_secs = self.idle_for.as_secs(), "proactive speech enabled");
        let mut deadline = self.arm_if_idle();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                event = events.recv() => match event {
                    Ok(Event::StateChanged { to, .. }) => {
                        deadline = (to == AgentState::Idle).then(|| Instant::now() + self.idle_for);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "proactive speaker lagged");
                        deadline = self.arm_if_idle();
                    }
                    Err(RecvError::Closed) => break,
                },

                _ = sleep_until(deadline), if deadline.is_some() => {
                    deadline = None;
                    if self.state.is_idle() {
                        debug!("idle long enough, asking the agent to speak");
                        if let Err(e) = self.sink.send(&OutboundMessage::AiSpeakSignal) {
                            warn!(error = %e, "ai-speak-signal not sent");
                        }
                    }
                }
            }
        }
    }

    fn arm_if_idle(&self) -> Option<Instant> {
        self.state.is_idle().then(|| Instant::now() + self.idle_for)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
