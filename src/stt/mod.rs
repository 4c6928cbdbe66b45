//! Speech-to-text for the poll-transcribe wake strategy

mod cloud;

pub use cloud::HttpTranscriber;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("transcription request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("transcription endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transcription response has no text field")]
    MissingText,
}

/// Turns a canonical WAV clip into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, TranscriptionError>;
}
