//! Poll-transcribe strategy
//!
//! Record a short clip, transcode it to WAV, send it for transcription and
//! test the text against the wake phrases. Repeats until a phrase matches,
//! the mic comes on or the loop is cancelled.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PhraseSet;
use crate::audio::{transcode_to_wav, AudioCapture, TranscodeError};
use crate::mic::MicSwitch;
use crate::stt::{Transcriber, TranscriptionError};

/// Timing knobs for one poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Length of each recorded clip
    pub clip: Duration,
    /// Pause after a failed cycle
    pub retry_delay: Duration,
    /// Pause between cycles that heard nothing
    pub cycle_gap: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            clip: Duration::from_millis(3000),
            retry_delay: Duration::from_millis(1000),
            cycle_gap: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("capture failed: {0:#}")]
    Capture(anyhow::Error),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error("transcode task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Record, transcode and transcribe one clip
pub struct PollTranscriber {
    capture: Arc<dyn AudioCapture>,
    transcriber: Arc<dyn Transcriber>,
    timing: PollTiming,
}

impl PollTranscriber {
    pub fn new(capture: Arc<dyn AudioCapture>, transcriber: Arc<dyn Transcriber>, timing: PollTiming) -> Self {
        Self {
            capture,
            transcriber,
            timing,
        }
    }

    pub fn timing(&self) -> PollTiming {
        self.timing
    }

    /// One record-transcode-transcribe pass
    pub async fn cycle(&self) -> Result<String, CycleError> {
        let clip = self
            .capture
            .record(self.timing.clip)
            .await
            .map_err(CycleError::Capture)?;

        let wav = tokio::task::spawn_blocking(move || transcode_to_wav(&clip.bytes, clip.extension.as_deref()))
            .await??;

        let text = self.transcriber.transcribe(wav).await?;
        Ok(text)
    }
}

/// Handle to a running poll loop
pub struct PollLoop {
    transcriber: Arc<PollTranscriber>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl PollLoop {
    pub fn new(transcriber: PollTranscriber) -> Self {
        Self {
            transcriber: Arc::new(transcriber),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Start the loop unless it is already running.
    ///
    /// A match is reported on `hit_tx`; the loop then exits. Returns whether
    /// a new loop was started.
    pub fn start(
        &mut self,
        parent: &CancellationToken,
        mic: MicSwitch,
        phrases: PhraseSet,
        hit_tx: mpsc::UnboundedSender<()>,
    ) -> bool {
        if self.is_running() {
            debug!("poll loop already running");
            return false;
        }

        let cancel = parent.child_token();
        let transcriber = Arc::clone(&self.transcriber);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            if run_poll_loop(&transcriber, &token, &mic, &phrases).await {
                let _ = hit_tx.send(());
            }
        });
        self.running = Some((cancel, handle));
        info!("poll-transcribe loop started");
        true
    }

    /// Cancel the loop. An in-flight cycle is abandoned.
    pub fn stop(&mut self) {
        if let Some((cancel, _handle)) = self.running.take() {
            cancel.cancel();
            debug!("poll-transcribe loop stopped");
        }
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns `true` when a wake phrase was heard with the mic still off
async fn run_poll_loop(
    poll: &PollTranscriber,
    cancel: &CancellationToken,
    mic: &MicSwitch,
    phrases: &PhraseSet,
) -> bool {
    let timing = poll.timing();
    loop {
        if cancel.is_cancelled() || mic.is_on() {
            return false;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return false,
            result = poll.cycle() => result,
        };

        let pause = match result {
            Ok(text) => {
                if mic.is_on() {
                    return false;
                }
                if phrases.matches(&text) {
                    info!(text = %text, "wake phrase heard");
                    return true;
                }
                debug!(text = %text, "no wake phrase");
                timing.cycle_gap
            }
            Err(e) => {
                warn!(error = %e, "poll-transcribe cycle failed");
                timing.retry_delay
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockCapture, ScriptedTranscriber};

    fn poll_loop(transcriber: Arc<ScriptedTranscriber>) -> (PollLoop, Arc<MockCapture>) {
        let capture = Arc::new(MockCapture::default());
        let poll = PollTranscriber::new(capture.clone(), transcriber, PollTiming::default());
        (PollLoop::new(poll), capture)
    }

    fn wake() -> PhraseSet {
        PhraseSet::new(["你好，小薇"])
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_reports_match() {
        let stt = Arc::new(ScriptedTranscriber::new([
            Ok("今天天气不错".to_string()),
            Err(503),
            Ok("你好 小薇".to_string()),
        ]));
        let (mut poll, _) = poll_loop(stt.clone());
        let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();

        assert!(poll.start(&CancellationToken::new(), MicSwitch::new(), wake(), hit_tx));
        hit_rx.recv().await.unwrap();

        assert_eq!(stt.calls(), 3);
        tokio::task::yield_now().await;
        assert!(!poll.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let stt = Arc::new(ScriptedTranscriber::default());
        let (mut poll, capture) = poll_loop(stt);
        let (hit_tx, _hit_rx) = mpsc::unbounded_channel();
        let root = CancellationToken::new();

        assert!(poll.start(&root, MicSwitch::new(), wake(), hit_tx.clone()));
        assert!(!poll.start(&root, MicSwitch::new(), wake(), hit_tx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(capture.records.load(std::sync::atomic::Ordering::SeqCst), 1);
        poll.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_mic_on_stops_before_next_cycle() {
        let stt = Arc::new(ScriptedTranscriber::default());
        let (mut poll, capture) = poll_loop(stt.clone());
        let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();
        let mic = MicSwitch::new();

        poll.start(&CancellationToken::new(), mic.clone(), wake(), hit_tx);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        mic.start();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(capture.records.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!poll.is_running());
        assert!(hit_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_abandons_cycle() {
        let stt = Arc::new(ScriptedTranscriber::new([Ok("你好，小薇".to_string())]));
        let (mut poll, _) = poll_loop(stt.clone());
        let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();

        poll.start(&CancellationToken::new(), MicSwitch::new(), wake(), hit_tx);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        poll.stop();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(stt.calls(), 0);
        assert!(hit_rx.recv().await.is_none());
    }
}
