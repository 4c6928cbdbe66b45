//! Live recognizer strategy
//!
//! Wraps a platform speech recognizer that reports back through a channel
//! of [`RecognizerEvent`]s. The wrapper owns the start guard, folds the
//! provider's `error` + `end` pair into a single failure and drops the
//! trailing events of attempts it stopped itself.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognizerError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("recognizer already running")]
    AlreadyRunning,

    #[error("speech recognition unavailable: {0}")]
    Unavailable(String),

    #[error("recognizer error: {0}")]
    Other(String),
}

/// Events a recognizer emits, in order, for each attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    Started,
    /// One recognized utterance
    Result(String),
    Error(RecognizerError),
    Ended,
}

/// Platform continuous speech recognizer.
///
/// Each attempt reports `Started` first and `Ended` last, including
/// attempts ended by [`SpeechRecognizer::stop`].
pub trait SpeechRecognizer: Send + Sync {
    /// Begin a recognition attempt. Events follow on the recognizer's channel.
    fn start(&self) -> Result<(), RecognizerError>;

    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerState {
    #[default]
    Stopped,
    Starting,
    Active,
}

/// What a recognizer event means for the detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Nothing to do
    Ignored,
    Transcript(String),
    /// The attempt is over. Carries the error when the provider gave one.
    Failed(Option<RecognizerError>),
}

/// A recognizer plus its event stream and start guard
pub struct LiveRecognizer {
    recognizer: Arc<dyn SpeechRecognizer>,
    events: mpsc::UnboundedReceiver<RecognizerEvent>,
    state: RecognizerState,
    /// Attempts stopped by us whose `Ended` has not arrived yet
    stale_attempts: u32,
}

impl LiveRecognizer {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, events: mpsc::UnboundedReceiver<RecognizerEvent>) -> Self {
        Self {
            recognizer,
            events,
            state: RecognizerState::Stopped,
            stale_attempts: 0,
        }
    }

    pub fn state(&self) -> RecognizerState {
        self.state
    }

    /// Start an attempt unless one is already running or starting.
    ///
    /// Returns whether a new attempt began.
    pub fn start(&mut self) -> Result<bool, RecognizerError> {
        if self.state != RecognizerState::Stopped {
            debug!(state = ?self.state, "recognizer start ignored");
            return Ok(false);
        }

        self.state = RecognizerState::Starting;
        match self.recognizer.start() {
            Ok(()) => {
                self.state = RecognizerState::Active;
                info!("live recognizer listening for wake phrase");
                Ok(true)
            }
            Err(RecognizerError::AlreadyRunning) => {
                self.state = RecognizerState::Active;
                Ok(false)
            }
            Err(e) => {
                self.state = RecognizerState::Stopped;
                Err(e)
            }
        }
    }

    pub fn stop(&mut self) {
        if self.state != RecognizerState::Stopped {
            self.recognizer.stop();
            self.state = RecognizerState::Stopped;
            self.stale_attempts += 1;
            debug!("live recognizer stopped");
        }
    }

    /// Next event from the provider; `None` once the provider is gone
    pub async fn next_event(&mut self) -> Option<RecognizerEvent> {
        self.events.recv().await
    }

    /// Fold one provider event into the start guard.
    ///
    /// Events from an attempt that was stopped here are dropped until that
    /// attempt's `Ended`, or the next attempt's `Started`, shows up.
    pub fn on_event(&mut self, event: RecognizerEvent) -> LiveOutcome {
        if self.stale_attempts > 0 {
            match event {
                RecognizerEvent::Started => {
                    self.stale_attempts = 0;
                    if self.state != RecognizerState::Stopped {
                        self.state = RecognizerState::Active;
                    }
                }
                RecognizerEvent::Ended => {
                    self.stale_attempts -= 1;
                    debug!(pending = self.stale_attempts, "stopped attempt ended");
                }
                other => debug!(event = ?other, "ignoring event from stopped attempt"),
            }
            return LiveOutcome::Ignored;
        }

        match event {
            RecognizerEvent::Started => {
                if self.state != RecognizerState::Stopped {
                    self.state = RecognizerState::Active;
                }
                LiveOutcome::Ignored
            }
            RecognizerEvent::Result(text) => {
                let text = text.trim().to_string();
                debug!(text = %text, "recognizer heard");
                LiveOutcome::Transcript(text)
            }
            RecognizerEvent::Error(e) => {
                if self.state == RecognizerState::Stopped {
                    return LiveOutcome::Ignored;
                }
                warn!(error = %e, "live recognizer error");
                self.state = RecognizerState::Stopped;
                LiveOutcome::Failed(Some(e))
            }
            RecognizerEvent::Ended => {
                if self.state == RecognizerState::Stopped {
                    return LiveOutcome::Ignored;
                }
                debug!("live recognizer ended");
                self.state = RecognizerState::Stopped;
                LiveOutcome::Failed(None)
            }
        }
    }
}
