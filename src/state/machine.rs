//! Core state machine implementation
//!
//! Holds the single process-wide `AgentState` and the cancellable timer
//! that pulls a transient `Waiting` state back to `Idle`.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::events::Event;

/// How long `Waiting` may persist before the machine forces `Idle`
pub const WAITING_TIMEOUT: Duration = Duration::from_millis(2000);

/// The six activity states of the backend agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Ready to receive user input
    Idle,
    /// Producing a response; can be interrupted
    ThinkingSpeaking,
    /// The current response was cut off
    Interrupted,
    /// Initial load or character switch
    Loading,
    /// User speech detected
    Listening,
    /// User is typing; transient
    Waiting,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::Loading
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Idle => write!(f, "Idle"),
            AgentState::ThinkingSpeaking => write!(f, "ThinkingSpeaking"),
            AgentState::Interrupted => write!(f, "Interrupted"),
            AgentState::Loading => write!(f, "Loading"),
            AgentState::Listening => write!(f, "Listening"),
            AgentState::Waiting => write!(f, "Waiting"),
        }
    }
}

/// Owns the agent state and the `Waiting` revert timer.
///
/// Cheap to clone; every clone drives the same state. Transitions that arm
/// the timer must run inside a Tokio runtime.
#[derive(Clone)]
pub struct AiStateMachine {
    inner: Arc<Mutex<Inner>>,
    event_tx: broadcast::Sender<Event>,
}

struct Inner {
    state: AgentState,
    /// At most one revert timer is alive at a time
    waiting_timer: Option<AbortHandle>,
    /// Bumped whenever a timer is armed or cancelled so a timer that lost
    /// the race with `abort` cannot fire a stale revert
    timer_epoch: u64,
}

impl AiStateMachine {
    /// Create a new state machine in the `Loading` state
    pub fn new(event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: AgentState::default(),
                waiting_timer: None,
                timer_epoch: 0,
            })),
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> AgentState {
        self.lock().state
    }

    /// Move to `next`.
    ///
    /// Returns `false` when the request was ignored, which only happens for
    /// `Waiting` while the agent is speaking.
    pub fn set_state(&self, next: AgentState) -> bool {
        let mut inner = self.lock();
        self.apply(&mut inner, next)
    }

    /// Move to whatever `updater` computes from the current state.
    ///
    /// The updater runs under the state lock and must not call back into
    /// the machine. Returns the resulting state.
    pub fn update(&self, updater: impl FnOnce(AgentState) -> AgentState) -> AgentState {
        let mut inner = self.lock();
        let next = updater(inner.state);
        self.apply(&mut inner, next);
        inner.state
    }

    /// Move to `target` only if `when` holds for the current state.
    ///
    /// Returns whether the transition happened.
    pub fn compare_and_set(&self, when: impl FnOnce(AgentState) -> bool, target: AgentState) -> bool {
        let mut inner = self.lock();
        if !when(inner.state) {
            return false;
        }
        self.apply(&mut inner, target)
    }

    /// Unconditionally return to `Idle`
    pub fn reset(&self) {
        self.set_state(AgentState::Idle);
    }

    pub fn is_idle(&self) -> bool {
        self.state() == AgentState::Idle
    }

    pub fn is_thinking_speaking(&self) -> bool {
        self.state() == AgentState::ThinkingSpeaking
    }

    pub fn is_interrupted(&self) -> bool {
        self.state() == AgentState::Interrupted
    }

    pub fn is_loading(&self) -> bool {
        self.state() == AgentState::Loading
    }

    pub fn is_listening(&self) -> bool {
        self.state() == AgentState::Listening
    }

    pub fn is_waiting(&self) -> bool {
        self.state() == AgentState::Waiting
    }

    /// Dispose of the revert timer
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        cancel_timer(&mut inner);
        debug!("state machine timer disposed");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn apply(&self, inner: &mut Inner, next: AgentState) -> bool {
        if next == AgentState::Waiting {
            if inner.state == AgentState::ThinkingSpeaking {
                debug!("ignoring Waiting while the agent is speaking");
                return false;
            }
            cancel_timer(inner);
            transition_to(inner, next, &self.event_tx);
            self.arm_waiting_timer(inner);
        } else {
            cancel_timer(inner);
            transition_to(inner, next, &self.event_tx);
        }
        true
    }

    fn arm_waiting_timer(&self, inner: &mut Inner) {
        inner.timer_epoch += 1;
        let epoch = inner.timer_epoch;
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(WAITING_TIMEOUT).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut inner = match shared.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if inner.timer_epoch != epoch || inner.waiting_timer.is_none() {
                return;
            }
            inner.waiting_timer = None;
            debug!("waiting timeout elapsed");
            transition_to(&mut inner, AgentState::Idle, &event_tx);
        });

        inner.waiting_timer = Some(handle.abort_handle());
    }
}

fn cancel_timer(inner: &mut Inner) {
    if let Some(timer) = inner.waiting_timer.take() {
        timer.abort();
        inner.timer_epoch += 1;
    }
}

/// Perform a state transition
fn transition_to(inner: &mut Inner, new_state: AgentState, event_tx: &broadcast::Sender<Event>) {
    let old_state = inner.state;
    inner.state = new_state;
    if old_state == new_state {
        return;
    }

    info!(from = %old_state, to = %new_state, "state transition");
    let _ = event_tx.send(Event::StateChanged {
        from: old_state,
        to: new_state,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_state_machine() -> (AiStateMachine, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(16);
        (AiStateMachine::new(tx), rx)
    }

    #[test]
    fn test_initial_state() {
        let (sm, _) = create_state_machine();
        assert_eq!(sm.state(), AgentState::Loading);
        assert!(sm.is_loading());
    }

    #[tokio::test]
    async fn test_last_target_wins() {
        let (sm, _) = create_state_machine();
        let sequence = [
            AgentState::Idle,
            AgentState::Listening,
            AgentState::ThinkingSpeaking,
            AgentState::Interrupted,
            AgentState::Waiting,
            AgentState::Idle,
        ];
        for target in sequence {
            assert!(sm.set_state(target));
            assert_eq!(sm.state(), target);
        }
    }

    #[tokio::test]
    async fn test_waiting_ignored_while_speaking() {
        let (sm, _) = create_state_machine();
        sm.set_state(AgentState::ThinkingSpeaking);

        assert!(!sm.set_state(AgentState::Waiting));
        assert_eq!(sm.state(), AgentState::ThinkingSpeaking);
        assert!(sm.is_thinking_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_reverts_after_timeout() {
        let (sm, _) = create_state_machine();
        sm.set_state(AgentState::Idle);
        sm.set_state(AgentState::Waiting);

        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(sm.state(), AgentState::Waiting);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(sm.state(), AgentState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_transition_cancels_revert() {
        let (sm, _) = create_state_machine();
        sm.set_state(AgentState::Waiting);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        sm.set_state(AgentState::ThinkingSpeaking);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(sm.state(), AgentState::ThinkingSpeaking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentering_waiting_rearms_timer() {
        let (sm, _) = create_state_machine();
        sm.set_state(AgentState::Waiting);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        sm.set_state(AgentState::Waiting);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(sm.state(), AgentState::Waiting);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(sm.state(), AgentState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disposes_timer() {
        let (sm, _) = create_state_machine();
        sm.set_state(AgentState::Waiting);
        sm.shutdown();

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(sm.state(), AgentState::Waiting);
    }

    #[tokio::test]
    async fn test_compare_and_set_only_from_matching_state() {
        let (sm, _) = create_state_machine();
        let speaking_to_idle = |s: AgentState| s == AgentState::ThinkingSpeaking;

        assert!(!sm.compare_and_set(speaking_to_idle, AgentState::Idle));
        assert_eq!(sm.state(), AgentState::Loading);

        sm.set_state(AgentState::ThinkingSpeaking);
        assert!(sm.compare_and_set(speaking_to_idle, AgentState::Idle));
        assert_eq!(sm.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn test_updater_sees_current_state() {
        let (sm, _) = create_state_machine();
        sm.set_state(AgentState::Listening);

        let result = sm.update(|current| {
            if current == AgentState::Listening {
                AgentState::Idle
            } else {
                current
            }
        });
        assert_eq!(result, AgentState::Idle);
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle() {
        let (sm, _) = create_state_machine();
        sm.set_state(AgentState::Interrupted);
        sm.reset();
        assert!(sm.is_idle());
    }

    #[tokio::test]
    async fn test_transitions_emit_events() {
        let (sm, mut rx) = create_state_machine();
        sm.set_state(AgentState::Idle);
        sm.set_state(AgentState::Idle);
        sm.set_state(AgentState::Listening);

        assert_eq!(
            rx.try_recv().unwrap(),
            Event::StateChanged {
                from: AgentState::Loading,
                to: AgentState::Idle
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::StateChanged {
                from: AgentState::Idle,
                to: AgentState::Listening
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
