//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::audio::{AudioFrame, samples_to_wav};
use crate::{Error, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com";

/// Default request timeout for transcription calls
pub const DEFAULT_STT_TIMEOUT: Duration = Duration::from_secs(20);

/// Why a transcription produced no text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscribeError {
    /// The service did not answer in time
    #[error("transcription timed out")]
    Timeout,

    /// The service answered but found no words
    #[error("could not understand audio")]
    Unintelligible,

    /// The service could not be reached or rejected the request
    #[error("transcription service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<reqwest::Error> for TranscribeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::ServiceUnavailable(e.to_string())
        }
    }
}

/// Turns a captured utterance into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a mono 16-bit buffer
    ///
    /// # Errors
    ///
    /// Returns a [`TranscribeError`] describing why no text was produced
    async fn transcribe(&self, audio: &AudioFrame) -> std::result::Result<String, TranscribeError>;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    /// `OpenAI` Whisper
    Whisper,
    /// Deepgram prerecorded API
    Deepgram,
}

impl std::str::FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Transcribes speech to text over HTTP
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
    base_url: String,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new_whisper(api_key: SecretString, model: String, timeout: Duration) -> Result<Self> {
        Self::build(api_key, model, timeout, SttProvider::Whisper, OPENAI_BASE_URL)
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new_deepgram(api_key: SecretString, model: String, timeout: Duration) -> Result<Self> {
        Self::build(api_key, model, timeout, SttProvider::Deepgram, DEEPGRAM_BASE_URL)
    }

    fn build(
        api_key: SecretString,
        model: String,
        timeout: Duration,
        provider: SttProvider,
        base_url: &str,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!("{provider:?} API key required for STT")));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            model,
            provider,
            base_url: base_url.to_string(),
        })
    }

    /// Point requests at a different host (proxies, tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Transcribe using `OpenAI` Whisper
    async fn transcribe_whisper(&self, wav: Vec<u8>) -> std::result::Result<String, TranscribeError> {
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::ServiceUnavailable(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .multipart(form)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Whisper request failed"))?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(TranscribeError::ServiceUnavailable(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, wav: Vec<u8>) -> std::result::Result<String, TranscribeError> {
        tracing::debug!(audio_bytes = wav.len(), "starting Deepgram transcription");

        let url = format!(
            "{}/v1/listen?model={}&punctuate=true",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(wav)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Deepgram request failed"))?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(TranscribeError::ServiceUnavailable(format!(
                "Deepgram API error {status}: {body}"
            )));
        }

        let result: DeepgramResponse = response.json().await?;

        Ok(result
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: &AudioFrame) -> std::result::Result<String, TranscribeError> {
        let wav = samples_to_wav(audio.samples(), audio.sample_rate())
            .map_err(|e| TranscribeError::ServiceUnavailable(e.to_string()))?;

        let text = match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav).await?,
            SttProvider::Deepgram => self.transcribe_deepgram(wav).await?,
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(TranscribeError::Unintelligible);
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn utterance() -> AudioFrame {
        AudioFrame::new(vec![0, 1200, -1200, 800], 16000)
    }

    fn whisper(server: &MockServer, timeout: Duration) -> SpeechToText {
        SpeechToText::new_whisper(
            SecretString::from("sk-test".to_string()),
            "whisper-1".to_string(),
            timeout,
        )
        .unwrap()
        .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_whisper_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "text": " what time is it " })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stt = whisper(&server, DEFAULT_STT_TIMEOUT);
        assert_eq!(stt.transcribe(&utterance()).await.unwrap(), "what time is it");
    }

    #[tokio::test]
    async fn test_empty_transcript_is_unintelligible() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "text": "  " })))
            .mount(&server)
            .await;

        let stt = whisper(&server, DEFAULT_STT_TIMEOUT);
        assert_eq!(
            stt.transcribe(&utterance()).await.unwrap_err(),
            TranscribeError::Unintelligible
        );
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let stt = whisper(&server, DEFAULT_STT_TIMEOUT);
        assert!(matches!(
            stt.transcribe(&utterance()).await.unwrap_err(),
            TranscribeError::ServiceUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "text": "late" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let stt = whisper(&server, Duration::from_millis(50));
        assert_eq!(
            stt.transcribe(&utterance()).await.unwrap_err(),
            TranscribeError::Timeout
        );
    }

    #[tokio::test]
    async fn test_deepgram_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/listen"))
            .and(query_param("model", "nova-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": { "channels": [ { "alternatives": [ { "transcript": "read my email" } ] } ] }
            })))
            .mount(&server)
            .await;

        let stt = SpeechToText::new_deepgram(
            SecretString::from("dg".to_string()),
            "nova-2".to_string(),
            DEFAULT_STT_TIMEOUT,
        )
        .unwrap()
        .with_base_url(server.uri());

        assert_eq!(stt.transcribe(&utterance()).await.unwrap(), "read my email");
    }
}
