//! Text-to-speech client.
//!
//! `POST /api/tts` with `{"text", "voiceId"}`; the response body is the audio
//! itself and its `Content-Type` becomes the asset's mime type.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{ServiceConfig, SpeechConfig};
use crate::http;

// ---------------------------------------------------------------------------
// AudioAsset
// ---------------------------------------------------------------------------

/// Encoded audio ready for the output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioAsset {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SynthesisError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    #[error("speech request failed: {0}")]
    Request(String),

    #[error("speech request timed out")]
    Timeout,

    #[error("speech service error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("speech service returned no audio")]
    EmptyAudio,
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SynthesisError::Timeout
        } else {
            SynthesisError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Synthesizer trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioAsset, SynthesisError>;
}

// ---------------------------------------------------------------------------
// HttpSynthesizer
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    #[serde(rename = "voiceId", skip_serializing_if = "Option::is_none")]
    voice_id: Option<&'a str>,
}

pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    voice_id: Option<String>,
}

impl HttpSynthesizer {
    pub fn from_config(service: &ServiceConfig, speech: &SpeechConfig) -> Self {
        Self {
            client: http::build_client(service),
            endpoint: service.endpoint("/api/tts"),
            voice_id: speech.voice_id.clone(),
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioAsset, SynthesisError> {
        let body = TtsRequest {
            text,
            voice_id: self.voice_id.as_deref(),
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                message: http::error_message(response).await,
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        log::debug!("tts: {} bytes of {mime_type} for {} chars", bytes.len(), text.chars().count());
        Ok(AudioAsset::new(bytes.to_vec(), mime_type))
    }
}

// ---------------------------------------------------------------------------
// MockSynthesizer  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::{clip as mock_clip, MockSynthesizer};

#[cfg(test)]
mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// Returns the text itself as a `text/plain` "clip" so tests can tell
    /// clips apart.  Per-text delays and failures are configurable.
    #[derive(Default)]
    pub struct MockSynthesizer {
        delays: HashMap<String, Duration>,
        failures: Vec<String>,
        requests: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockSynthesizer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn delay(mut self, text: &str, delay: Duration) -> Self {
            self.delays.insert(text.to_string(), delay);
            self
        }

        pub fn fail_on(mut self, text: &str) -> Self {
            self.failures.push(text.to_string());
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    pub fn clip(text: &str) -> AudioAsset {
        AudioAsset::new(text.as_bytes().to_vec(), "text/plain")
    }

    #[async_trait]
    impl Synthesizer for MockSynthesizer {
        async fn synthesize(&self, text: &str) -> Result<AudioAsset, SynthesisError> {
            self.requests.lock().unwrap().push(text.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(text) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failures.iter().any(|f| f == text) {
                Err(SynthesisError::Status {
                    status: 500,
                    message: "synthesis failed".into(),
                })
            } else {
                Ok(clip(text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_missing_voice() {
        let json = serde_json::to_value(TtsRequest {
            text: "Hi",
            voice_id: None,
        })
        .expect("serialise");
        assert_eq!(json, serde_json::json!({"text": "Hi"}));
    }

    #[test]
    fn request_carries_voice() {
        let json = serde_json::to_value(TtsRequest {
            text: "Hi",
            voice_id: Some("voice-1"),
        })
        .expect("serialise");
        assert_eq!(json, serde_json::json!({"text": "Hi", "voiceId": "voice-1"}));
    }

    #[test]
    fn from_config_targets_tts_endpoint() {
        let synth = HttpSynthesizer::from_config(&ServiceConfig::default(), &SpeechConfig::default());
        assert_eq!(synth.endpoint, "http://localhost:3000/api/tts");
        assert!(synth.voice_id.is_none());
    }

    #[tokio::test]
    async fn mock_fails_only_configured_text() {
        let synth = MockSynthesizer::new().fail_on("bad");
        assert!(synth.synthesize("good").await.is_ok());
        assert!(synth.synthesize("bad").await.is_err());
        assert_eq!(synth.requests(), vec!["good", "bad"]);
    }
}
