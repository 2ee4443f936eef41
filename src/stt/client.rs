//! Transcription client.
//!
//! [`Transcriber`] is the seam the orchestrator calls; [`HttpTranscriber`]
//! uploads the finished clip as multipart form data to `/api/stt` and reads
//! `{"text": ...}` back.  An empty transcript is a successful result.
//! Nothing here retries.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::audio::FinishedAudio;
use crate::config::ServiceConfig;
use crate::http;

// ---------------------------------------------------------------------------
// TranscriptionError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum TranscriptionError {
    #[error("transcription request failed: {0}")]
    Request(String),

    #[error("transcription request timed out")]
    Timeout,

    /// The service answered with a non-success status.
    #[error("transcription service error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("failed to parse transcription response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for TranscriptionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TranscriptionError::Timeout
        } else {
            TranscriptionError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Transcriber trait
// ---------------------------------------------------------------------------

/// Speech-to-text round trip.
///
/// `language_hint` is an ISO-639-1 code the service may use to bias
/// recognition; it is advisory.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &FinishedAudio,
        language_hint: Option<&str>,
    ) -> Result<String, TranscriptionError>;
}

// ---------------------------------------------------------------------------
// HttpTranscriber
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SttResponse {
    #[serde(default)]
    text: String,
}

pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriber {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            client: http::build_client(config),
            endpoint: config.endpoint("/api/stt"),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        audio: &FinishedAudio,
        language_hint: Option<&str>,
    ) -> Result<String, TranscriptionError> {
        let part = reqwest::multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name)
            .mime_str(audio.mime_type)
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new().part("audio", part);
        if let Some(lang) = language_hint {
            form = form.text("currentLanguage", lang.to_string());
        }

        log::debug!(
            "stt: uploading {} bytes (hint: {:?})",
            audio.bytes.len(),
            language_hint
        );
        let response = self.client.post(&self.endpoint).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranscriptionError::Status {
                status: status.as_u16(),
                message: http::error_message(response).await,
            });
        }

        let body: SttResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Parse(e.to_string()))?;
        Ok(body.text)
    }
}

// ---------------------------------------------------------------------------
// MockTranscriber  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub struct MockTranscriber {
    script: crate::testing::Script<Result<String, TranscriptionError>>,
    hints: std::sync::Mutex<Vec<Option<String>>>,
}

#[cfg(test)]
impl MockTranscriber {
    pub fn ok(text: impl Into<String>) -> Self {
        Self::scripted(vec![(std::time::Duration::ZERO, Ok(text.into()))])
    }

    pub fn err(error: TranscriptionError) -> Self {
        Self::scripted(vec![(std::time::Duration::ZERO, Err(error))])
    }

    /// Replies in order, each after its delay; the last one repeats.
    pub fn scripted(replies: Vec<(std::time::Duration, Result<String, TranscriptionError>)>) -> Self {
        Self {
            script: crate::testing::Script::new(replies),
            hints: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.script.calls()
    }

    pub fn hints(&self) -> Vec<Option<String>> {
        self.hints.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(
        &self,
        _audio: &FinishedAudio,
        language_hint: Option<&str>,
    ) -> Result<String, TranscriptionError> {
        self.hints
            .lock()
            .unwrap()
            .push(language_hint.map(str::to_string));
        self.script.next().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> FinishedAudio {
        FinishedAudio::from_samples(&[0.0; 1_600], 16_000).expect("encode")
    }

    #[test]
    fn from_config_targets_stt_endpoint() {
        let transcriber = HttpTranscriber::from_config(&ServiceConfig::default());
        assert_eq!(transcriber.endpoint, "http://localhost:3000/api/stt");
    }

    #[test]
    fn transcriber_is_object_safe() {
        let t: Box<dyn Transcriber> =
            Box::new(HttpTranscriber::from_config(&ServiceConfig::default()));
        drop(t);
    }

    #[test]
    fn empty_text_field_defaults() {
        let body: SttResponse = serde_json::from_str("{}").expect("parse");
        assert_eq!(body.text, "");
    }

    #[tokio::test]
    async fn mock_records_hints_and_repeats_last_reply() {
        let mock = MockTranscriber::ok("Hello");
        assert_eq!(mock.transcribe(&clip(), Some("fr")).await.unwrap(), "Hello");
        assert_eq!(mock.transcribe(&clip(), None).await.unwrap(), "Hello");
        assert_eq!(mock.calls(), 2);
        assert_eq!(mock.hints(), vec![Some("fr".to_string()), None]);
    }

    #[tokio::test]
    async fn unreachable_service_is_request_error() {
        let mut config = ServiceConfig::default();
        config.base_url = "http://127.0.0.1:9".into();
        config.timeout_secs = 2;
        let transcriber = HttpTranscriber::from_config(&config);
        let err = transcriber.transcribe(&clip(), None).await.unwrap_err();
        assert!(matches!(
            err,
            TranscriptionError::Request(_) | TranscriptionError::Timeout
        ));
    }
}
