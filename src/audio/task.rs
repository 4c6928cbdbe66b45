//! Audio task payloads and the playback collaborator

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::transport::protocol::{AudioPayload, DisplayText, Expression};

/// One unit of agent speech: audio, lip-sync envelope and caption
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioTask {
    /// Base64-encoded audio container as received from the backend
    pub audio_base64: String,
    /// Per-slice volume envelope
    pub volumes: Vec<f32>,
    /// Length of one envelope slice in milliseconds
    pub slice_length: u32,
    pub display_text: Option<DisplayText>,
    pub expressions: Option<Vec<Expression>>,
    /// Relayed from another group member
    pub forwarded: bool,
}

impl AudioTask {
    /// Decode the audio payload. An empty payload yields no bytes.
    pub fn decode_audio(&self) -> Result<Vec<u8>, base64::DecodeError> {
        if self.audio_base64.is_empty() {
            return Ok(Vec::new());
        }
        BASE64.decode(self.audio_base64.as_bytes())
    }

    /// Playback length implied by the volume envelope
    pub fn envelope_duration(&self) -> Duration {
        Duration::from_millis(self.slice_length as u64 * self.volumes.len() as u64)
    }

    /// Caption text, if any
    pub fn caption(&self) -> Option<&str> {
        self.display_text.as_ref().map(|d| d.text.as_str())
    }
}

impl From<AudioPayload> for AudioTask {
    fn from(payload: AudioPayload) -> Self {
        Self {
            audio_base64: payload.audio.unwrap_or_default(),
            volumes: payload.volumes.unwrap_or_default(),
            slice_length: payload.slice_length.unwrap_or(0),
            display_text: payload.display_text,
            expressions: payload.actions.and_then(|a| a.expressions),
            forwarded: payload.forwarded.unwrap_or(false),
        }
    }
}

/// Renders agent audio.
///
/// `play` resolves when playback has finished or as soon as `stop` is
/// cancelled, which may already be the case when it is called.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, task: &AudioTask, audio: Vec<u8>, stop: CancellationToken) -> anyhow::Result<()>;
}

/// Player for headless runs: logs the caption and holds for the envelope
/// duration so queue timing matches a real renderer.
#[derive(Debug)]
pub struct HeadlessPlayer;

impl HeadlessPlayer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HeadlessPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioPlayer for HeadlessPlayer {
    async fn play(&self, task: &AudioTask, audio: Vec<u8>, stop: CancellationToken) -> anyhow::Result<()> {
        if stop.is_cancelled() {
            debug!("playback cancelled before it started");
            return Ok(());
        }
        let duration = task.envelope_duration();
        info!(
            bytes = audio.len(),
            duration_ms = duration.as_millis() as u64,
            caption = task.caption().unwrap_or(""),
            "playing audio"
        );

        tokio::select! {
            _ = stop.cancelled() => debug!("playback stopped"),
            _ = tokio::time::sleep(duration) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::protocol::Actions;
    use std::sync::Arc;

    #[test]
    fn test_payload_defaults() {
        let task = AudioTask::from(AudioPayload::default());
        assert_eq!(task, AudioTask::default());
        assert_eq!(task.envelope_duration(), Duration::ZERO);
        assert!(task.decode_audio().unwrap().is_empty());
    }

    #[test]
    fn test_payload_conversion() {
        let payload = AudioPayload {
            audio: Some(BASE64.encode(b"RIFF")),
            volumes: Some(vec![0.1, 0.5, 0.2]),
            slice_length: Some(20),
            display_text: Some(DisplayText {
                text: "hi".to_string(),
                ..Default::default()
            }),
            actions: Some(Actions {
                expressions: Some(vec![Expression::Index(3)]),
            }),
            forwarded: Some(true),
        };

        let task = AudioTask::from(payload);
        assert_eq!(task.decode_audio().unwrap(), b"RIFF");
        assert_eq!(task.envelope_duration(), Duration::from_millis(60));
        assert_eq!(task.caption(), Some("hi"));
        assert_eq!(task.expressions, Some(vec![Expression::Index(3)]));
        assert!(task.forwarded);
    }

    #[test]
    fn test_bad_base64_is_an_error() {
        let task = AudioTask {
            audio_base64: "not base64!".to_string(),
            ..Default::default()
        };
        assert!(task.decode_audio().is_err());
    }

    fn ten_second_task() -> AudioTask {
        AudioTask {
            volumes: vec![0.5; 100],
            slice_length: 100,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_headless_player_stop_cuts_playback() {
        let player = Arc::new(HeadlessPlayer::new());
        let stop = CancellationToken::new();

        let p = Arc::clone(&player);
        let token = stop.clone();
        let playing = tokio::spawn(async move { p.play(&ten_second_task(), Vec::new(), token).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();

        let started = tokio::time::Instant::now();
        playing.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_headless_player_skips_when_stopped_early() {
        let stop = CancellationToken::new();
        stop.cancel();

        let started = tokio::time::Instant::now();
        HeadlessPlayer::new()
            .play(&ten_second_task(), Vec::new(), stop)
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
