//! Whisper transcription

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};

use crate::engine::CaptureError;
use crate::{Error, Result};

const TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// `OpenAI` Whisper client
#[derive(Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl SpeechToText {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for Whisper".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    /// Transcribe WAV audio in `locale`
    ///
    /// # Errors
    ///
    /// Returns the capture error code the failure maps to
    pub async fn transcribe(&self, wav: Vec<u8>, locale: &str) -> std::result::Result<String, CaptureError> {
        tracing::debug!(audio_bytes = wav.len(), locale, "starting Whisper transcription");

        let file = Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| {
                tracing::error!(error = %e, "bad upload mime type");
                CaptureError::Client
            })?;

        // Whisper takes ISO 639-1 ("zh"), not a full locale ("zh-TW")
        let language = locale.split(['-', '_']).next().unwrap_or(locale).to_lowercase();

        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", language);

        let response = self
            .client
            .post(TRANSCRIPTIONS_URL)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Whisper request failed");
                if e.is_timeout() {
                    CaptureError::NetworkTimeout
                } else {
                    CaptureError::Network
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Whisper API error");
            return Err(classify_status(status));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "failed to parse Whisper response");
            CaptureError::ServerDisconnected
        })?;

        let text = result.text.trim().to_string();
        if text.is_empty() {
            return Err(CaptureError::NoMatch);
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

fn classify_status(status: StatusCode) -> CaptureError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => CaptureError::TooManyRequests,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => CaptureError::NetworkTimeout,
        s if s.is_server_error() => CaptureError::Server,
        _ => CaptureError::Client,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_key() {
        assert!(SpeechToText::new(String::new(), "whisper-1".to_string()).is_err());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), CaptureError::TooManyRequests);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), CaptureError::Server);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), CaptureError::Client);
    }
}
