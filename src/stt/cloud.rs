//! Whisper-compatible HTTP transcription endpoint

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use tracing::debug;

use super::{Transcriber, TranscriptionError};

/// Posts clips as multipart form data with an optional bearer token
pub struct HttpTranscriber {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    language: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
}

impl HttpTranscriber {
    pub fn new(endpoint: &str, api_key: Option<String>, model: &str, language: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.to_string(),
            language: language.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, TranscriptionError> {
        debug!(bytes = wav.len(), endpoint = %self.endpoint, "sending clip for transcription");

        let file_part = multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let mut req = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TranscriptionError::Status { status, body });
        }

        let parsed: TranscriptionResponse = resp.json().await?;
        let text = parsed.text.ok_or(TranscriptionError::MissingText)?;
        debug!(text = %text, "clip transcribed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transcriber(server: &MockServer, key: Option<&str>) -> HttpTranscriber {
        HttpTranscriber::new(
            &format!("{}/v1/audio/transcriptions", server.uri()),
            key.map(str::to_string),
            "whisper-1",
            "zh",
        )
    }

    #[tokio::test]
    async fn test_transcribe_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "你好，小薇"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = transcriber(&server, Some("sk-test"))
            .transcribe(b"RIFF....WAVE".to_vec())
            .await
            .unwrap();
        assert_eq!(text, "你好，小薇");

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"file\"; filename=\"audio.wav\""));
        assert!(body.contains("name=\"model\""));
        assert!(body.contains("whisper-1"));
        assert!(body.contains("name=\"language\""));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = transcriber(&server, Some("nope"))
            .transcribe(Vec::new())
            .await
            .unwrap_err();
        match err {
            TranscriptionError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_text_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"segments": []})))
            .mount(&server)
            .await;

        let err = transcriber(&server, None).transcribe(Vec::new()).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::MissingText));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let t = HttpTranscriber::new("http://127.0.0.1:9/v1/audio/transcriptions", None, "whisper-1", "zh");
        let err = t.transcribe(Vec::new()).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::Request(_)));
    }
}
