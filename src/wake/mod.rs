//! Wake-word detection
//!
//! While the microphone is off the detector listens for a wake phrase and
//! toggles the mic on when it hears one. It prefers the live recognizer;
//! after too many consecutive failures it falls back to poll-transcribe for
//! the rest of the process.

mod live;
mod phrases;
mod poll;
mod session;

pub use live::{LiveOutcome, LiveRecognizer, RecognizerError, RecognizerEvent, RecognizerState, SpeechRecognizer};
pub use phrases::PhraseSet;
pub use poll::{CycleError, PollLoop, PollTiming, PollTranscriber};
pub use session::{FailureOutcome, Strategy, WakeWordSession};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mic::{MicSwitch, MicToggle};
use crate::notify::{Notification, Notifier};

/// Snapshot published after every detector step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WakeStatus {
    pub strategy: Strategy,
    pub failures: u32,
    pub recognizer: RecognizerState,
    pub polling: bool,
}

/// Detector knobs
#[derive(Debug, Clone)]
pub struct WakeSettings {
    pub phrases: PhraseSet,
    pub strategy: Strategy,
    pub failure_threshold: u32,
    pub restart_delay: Duration,
}

/// Owns both strategies and the fallback policy between them
pub struct WakeWordDetector {
    session: WakeWordSession,
    phrases: PhraseSet,
    toggle: MicToggle,
    notifier: Arc<dyn Notifier>,
    live: Option<LiveRecognizer>,
    poll: Option<PollLoop>,
    /// Pending live restart
    restart_at: Option<Instant>,
    cancel: CancellationToken,
    hit_tx: mpsc::UnboundedSender<()>,
    hit_rx: mpsc::UnboundedReceiver<()>,
    status_tx: watch::Sender<WakeStatus>,
}

impl WakeWordDetector {
    pub fn new(settings: WakeSettings, toggle: MicToggle, notifier: Arc<dyn Notifier>) -> Self {
        let session = WakeWordSession::new(
            settings.strategy,
            settings.failure_threshold,
            settings.restart_delay,
        );
        let (hit_tx, hit_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(WakeStatus {
            strategy: session.strategy(),
            failures: 0,
            recognizer: RecognizerState::Stopped,
            polling: false,
        });

        Self {
            session,
            phrases: settings.phrases,
            toggle,
            notifier,
            live: None,
            poll: None,
            restart_at: None,
            cancel: CancellationToken::new(),
            hit_tx,
            hit_rx,
            status_tx,
        }
    }

    /// Attach a platform recognizer and its event stream
    pub fn with_recognizer(
        mut self,
        recognizer: Arc<dyn SpeechRecognizer>,
        events: mpsc::UnboundedReceiver<RecognizerEvent>,
    ) -> Self {
        self.live = Some(LiveRecognizer::new(recognizer, events));
        self
    }

    /// Attach the poll-transcribe fallback
    pub fn with_poller(mut self, poller: PollTranscriber) -> Self {
        self.poll = Some(PollLoop::new(poller));
        self
    }

    /// Status updates for observers
    pub fn subscribe(&self) -> watch::Receiver<WakeStatus> {
        self.status_tx.subscribe()
    }

    /// Run the detector until `cancel` fires
    pub fn spawn(mut self, cancel: CancellationToken) -> (JoinHandle<()>, watch::Receiver<WakeStatus>) {
        self.cancel = cancel;
        let status = self.subscribe();
        let handle = tokio::spawn(self.run());
        (handle, status)
    }

    async fn run(mut self) {
        if self.live.is_none() && self.session.strategy() == Strategy::LiveRecognizer {
            info!("no live recognizer available, using poll-transcribe");
            self.session.demote();
        }

        let mut mic_rx = self.mic().subscribe();
        let mic_on = *mic_rx.borrow_and_update();
        if !mic_on {
            self.activate();
        }
        self.publish();

        loop {
            let restart_at = self.restart_at;
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                changed = mic_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let on = *mic_rx.borrow_and_update();
                    self.session.reset();
                    if on {
                        self.deactivate();
                    } else {
                        self.activate();
                    }
                }

                event = next_recognizer_event(&mut self.live) => match event {
                    Some(event) => self.on_recognizer_event(event),
                    None => {
                        warn!("live recognizer went away, using poll-transcribe");
                        self.live = None;
                        self.demote();
                    }
                },

                Some(()) = self.hit_rx.recv() => self.on_poll_hit(),

                _ = sleep_until(restart_at), if restart_at.is_some() => {
                    self.restart_at = None;
                    if !self.mic().is_on() && self.session.strategy() == Strategy::LiveRecognizer {
                        debug!("restarting live recognizer");
                        self.start_live();
                    }
                }
            }
            self.publish();
        }

        self.deactivate();
        self.publish();
        info!("wake-word detector stopped");
    }

    fn mic(&self) -> &MicSwitch {
        self.toggle.mic()
    }

    /// Mic went off: start the selected strategy
    fn activate(&mut self) {
        match self.session.strategy() {
            Strategy::LiveRecognizer => self.start_live(),
            Strategy::PollTranscribe => self.start_poll(),
        }
    }

    /// Mic went on: stop everything
    fn deactivate(&mut self) {
        self.restart_at = None;
        if let Some(live) = self.live.as_mut() {
            live.stop();
        }
        if let Some(poll) = self.poll.as_mut() {
            poll.stop();
        }
    }

    fn start_live(&mut self) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        if let Err(e) = live.start() {
            warn!(error = %e, "live recognizer failed to start");
            self.on_failure(Some(e));
        }
    }

    fn start_poll(&mut self) {
        if self.mic().is_on() {
            return;
        }
        let mic = self.mic().clone();
        match self.poll.as_mut() {
            Some(poll) => {
                poll.start(&self.cancel, mic, self.phrases.clone(), self.hit_tx.clone());
            }
            None => warn!("no poll transcriber configured, wake word disabled"),
        }
    }

    fn demote(&mut self) {
        self.restart_at = None;
        if let Some(live) = self.live.as_mut() {
            live.stop();
        }
        self.session.demote();
        self.start_poll();
    }

    fn on_recognizer_event(&mut self, event: RecognizerEvent) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        match live.on_event(event) {
            LiveOutcome::Ignored => {}
            LiveOutcome::Transcript(text) => {
                self.session.record_success();
                if self.phrases.matches(&text) && !self.mic().is_on() {
                    info!(text = %text, "wake phrase heard, turning microphone on");
                    self.toggle.toggle();
                }
            }
            LiveOutcome::Failed(error) => self.on_failure(error),
        }
    }

    fn on_failure(&mut self, error: Option<RecognizerError>) {
        if error == Some(RecognizerError::PermissionDenied) {
            self.notifier.notify(Notification::warning(
                "Microphone permission denied, wake word is unavailable",
            ));
        }
        if self.mic().is_on() {
            return;
        }

        match self.session.record_failure() {
            FailureOutcome::Retry(delay) => self.restart_at = Some(Instant::now() + delay),
            FailureOutcome::Demote => self.demote(),
        }
    }

    fn on_poll_hit(&mut self) {
        if self.mic().is_on() {
            debug!("wake phrase heard but microphone already on");
            return;
        }
        info!("wake phrase heard, turning microphone on");
        self.toggle.toggle();
    }

    fn publish(&self) {
        let status = WakeStatus {
            strategy: self.session.strategy(),
            failures: self.session.failures(),
            recognizer: self
                .live
                .as_ref()
                .map(LiveRecognizer::state)
                .unwrap_or_default(),
            polling: self.poll.as_ref().is_some_and(PollLoop::is_running),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

async fn next_recognizer_event(live: &mut Option<LiveRecognizer>) -> Option<RecognizerEvent> {
    match live {
        Some(live) => live.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
