//! Microphone clip capture
//!
//! The poll-transcribe wake strategy needs bounded recordings. Any recorder
//! works behind [`AudioCapture`]; [`CommandCapture`] shells out to an
//! external program (`arecord`, `sox`, `ffmpeg` ...) that writes the clip
//! to stdout.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Grace period on top of the clip length before the recorder is killed
const CAPTURE_GRACE: Duration = Duration::from_secs(5);

/// One recorded clip in whatever container the recorder produced
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedClip {
    pub bytes: Vec<u8>,
    /// Container hint for the transcoder, e.g. `"wav"`
    pub extension: Option<String>,
}

#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Record for `duration` and return the encoded clip
    async fn record(&self, duration: Duration) -> Result<EncodedClip>;
}

/// Records by running a shell command.
///
/// `{seconds}` and `{millis}` in the command line are replaced with the clip
/// length before it is run with `sh -c`.
#[derive(Debug, Clone)]
pub struct CommandCapture {
    command: String,
    extension: Option<String>,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>, extension: Option<String>) -> Self {
        Self {
            command: command.into(),
            extension,
        }
    }

    fn render(&self, duration: Duration) -> String {
        let seconds = duration.as_millis().div_ceil(1000).max(1);
        self.command
            .replace("{seconds}", &seconds.to_string())
            .replace("{millis}", &duration.as_millis().to_string())
    }
}

#[async_trait]
impl AudioCapture for CommandCapture {
    async fn record(&self, duration: Duration) -> Result<EncodedClip> {
        let command = self.render(duration);
        debug!(command = %command, "recording clip");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn capture command")?;

        let output = tokio::time::timeout(duration + CAPTURE_GRACE, child.wait_with_output())
            .await
            .context("capture command timed out")?
            .context("capture command failed")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("capture command exited with {}: {}", output.status, stderr.trim());
        }
        if output.stdout.is_empty() {
            bail!("capture command produced no audio");
        }

        Ok(EncodedClip {
            bytes: output.stdout,
            extension: self.extension.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_rendered() {
        let capture = CommandCapture::new("arecord -d {seconds} -t wav # {millis}", None);
        assert_eq!(
            capture.render(Duration::from_millis(2500)),
            "arecord -d 3 -t wav # 2500"
        );
    }

    #[tokio::test]
    async fn test_stdout_becomes_clip() {
        let capture = CommandCapture::new("printf RIFF", Some("wav".to_string()));
        let clip = capture.record(Duration::from_millis(10)).await.unwrap();
        assert_eq!(clip.bytes, b"RIFF");
        assert_eq!(clip.extension.as_deref(), Some("wav"));
    }

    #[tokio::test]
    async fn test_failing_command_is_an_error() {
        let capture = CommandCapture::new("echo no device >&2; exit 3", None);
        let err = capture.record(Duration::from_millis(10)).await.unwrap_err();
        assert!(err.to_string().contains("no device"));
    }

    #[tokio::test]
    async fn test_empty_output_is_an_error() {
        let capture = CommandCapture::new("true", None);
        assert!(capture.record(Duration::from_millis(10)).await.is_err());
    }
}
