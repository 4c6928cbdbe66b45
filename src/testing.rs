//! Recording collaborators shared by unit tests

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioCapture, AudioPlayer, AudioTask, EncodedClip};
use crate::notify::{Notification, Notifier};
use crate::stt::{Transcriber, TranscriptionError};
use crate::transport::{MessageSink, OutboundMessage, TransportError};
use crate::wake::{RecognizerError, SpeechRecognizer};

#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub raw: Mutex<Vec<serde_json::Value>>,
    pub offline: AtomicBool,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn raw(&self) -> Vec<serde_json::Value> {
        self.raw.lock().unwrap().clone()
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn send_raw(&self, message: &serde_json::Value) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.raw.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }

    pub fn seen(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

/// Finishes every clip immediately, optionally failing.
///
/// With `hold` set, each clip plays until its stop token fires.
#[derive(Default)]
pub struct RecordingPlayer {
    pub played: Mutex<Vec<AudioTask>>,
    pub fail: AtomicBool,
    pub hold: AtomicBool,
    /// Clips cut off by their stop token
    pub cut: AtomicUsize,
}

impl RecordingPlayer {
    pub fn played(&self) -> Vec<AudioTask> {
        self.played.lock().unwrap().clone()
    }

    pub fn cut(&self) -> usize {
        self.cut.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioPlayer for RecordingPlayer {
    async fn play(&self, task: &AudioTask, _audio: Vec<u8>, stop: CancellationToken) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("output device vanished");
        }
        if stop.is_cancelled() {
            self.cut.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        self.played.lock().unwrap().push(task.clone());
        if self.hold.load(Ordering::SeqCst) {
            stop.cancelled().await;
            self.cut.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockRecognizer {
    starts: AtomicUsize,
    stops: AtomicUsize,
    next_start_error: Mutex<Option<RecognizerError>>,
}

impl MockRecognizer {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn fail_next_start(&self, error: RecognizerError) {
        *self.next_start_error.lock().unwrap() = Some(error);
    }
}

impl SpeechRecognizer for MockRecognizer {
    fn start(&self) -> Result<(), RecognizerError> {
        if let Some(e) = self.next_start_error.lock().unwrap().take() {
            return Err(e);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A short 16-bit mono WAV, which the transcoder passes through untouched
pub fn silent_wav() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut out = Vec::new();
    let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec).unwrap();
    for _ in 0..160 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
    out
}

/// Records silence, taking the full clip duration
#[derive(Default)]
pub struct MockCapture {
    pub records: AtomicUsize,
}

#[async_trait]
impl AudioCapture for MockCapture {
    async fn record(&self, duration: Duration) -> anyhow::Result<EncodedClip> {
        self.records.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(duration).await;
        Ok(EncodedClip {
            bytes: silent_wav(),
            extension: Some("wav".to_string()),
        })
    }
}

/// Replies from a script; an empty script yields empty transcripts
#[derive(Default)]
pub struct ScriptedTranscriber {
    /// `Err(status)` entries fail with that HTTP status
    script: Mutex<VecDeque<Result<String, u16>>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, u16>>,
    {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _wav: Vec<u8>) -> Result<String, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(status)) => Err(TranscriptionError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            None => Ok(String::new()),
        }
    }
}
