//! Strategy selection and failure accounting for the wake-word detector

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How the detector listens for the wake phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Continuous platform recognizer
    #[serde(rename = "live")]
    LiveRecognizer,
    /// Record a clip, transcribe it over HTTP, repeat
    #[serde(rename = "poll")]
    PollTranscribe,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::LiveRecognizer
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::LiveRecognizer => write!(f, "live"),
            Strategy::PollTranscribe => write!(f, "poll"),
        }
    }
}

/// What to do after a live recognizer attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Restart the recognizer after the delay
    Retry(Duration),
    /// Give up on the live recognizer for good
    Demote,
}

/// Failure streak and active strategy.
///
/// The streak resets on every mic toggle and on every recognizer result;
/// demotion to [`Strategy::PollTranscribe`] is permanent.
#[derive(Debug, Clone)]
pub struct WakeWordSession {
    strategy: Strategy,
    failures: u32,
    threshold: u32,
    restart_delay: Duration,
}

impl WakeWordSession {
    pub fn new(strategy: Strategy, threshold: u32, restart_delay: Duration) -> Self {
        Self {
            strategy,
            failures: 0,
            threshold: threshold.max(1),
            restart_delay,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Consecutive live recognizer failures
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self) -> FailureOutcome {
        if self.strategy == Strategy::PollTranscribe {
            return FailureOutcome::Demote;
        }

        self.failures += 1;
        if self.failures >= self.threshold {
            warn!(failures = self.failures, "live recognizer keeps failing, switching to poll-transcribe");
            self.demote();
            return FailureOutcome::Demote;
        }
        info!(
            failures = self.failures,
            threshold = self.threshold,
            delay_ms = self.restart_delay.as_millis() as u64,
            "live recognizer failed, restart scheduled"
        );
        FailureOutcome::Retry(self.restart_delay)
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Switch to poll-transcribe for the rest of the process
    pub fn demote(&mut self) {
        self.strategy = Strategy::PollTranscribe;
        self.failures = 0;
    }

    /// Start a fresh streak, keeping the strategy
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(5000);

    #[test]
    fn test_demotes_on_threshold() {
        let mut session = WakeWordSession::new(Strategy::LiveRecognizer, 5, DELAY);
        for expected in 1..5 {
            assert_eq!(session.record_failure(), FailureOutcome::Retry(DELAY));
            assert_eq!(session.failures(), expected);
        }
        assert_eq!(session.record_failure(), FailureOutcome::Demote);
        assert_eq!(session.strategy(), Strategy::PollTranscribe);
    }

    #[test]
    fn test_success_resets_streak() {
        let mut session = WakeWordSession::new(Strategy::LiveRecognizer, 5, DELAY);
        for _ in 0..4 {
            session.record_failure();
        }
        session.record_success();
        assert_eq!(session.failures(), 0);

        for _ in 0..4 {
            assert!(matches!(session.record_failure(), FailureOutcome::Retry(_)));
        }
        assert_eq!(session.strategy(), Strategy::LiveRecognizer);
    }

    #[test]
    fn test_reset_keeps_demotion() {
        let mut session = WakeWordSession::new(Strategy::LiveRecognizer, 2, DELAY);
        session.record_failure();
        session.record_failure();
        session.reset();
        assert_eq!(session.strategy(), Strategy::PollTranscribe);
        assert_eq!(session.failures(), 0);
    }

    #[test]
    fn test_strategy_config_names() {
        assert_eq!(serde_json::to_string(&Strategy::LiveRecognizer).unwrap(), "\"live\"");
        let s: Strategy = serde_json::from_str("\"poll\"").unwrap();
        assert_eq!(s, Strategy::PollTranscribe);
    }
}
