//! OpenAI audio endpoints: Whisper transcription and text-to-speech.

use super::temp_path;
use crate::http;
use async_trait::async_trait;
use parley_core::error::{ProviderError, SpeechError};
use parley_core::scope::{CleanupHandle, MediaFile};
use parley_core::speech::{SpeechToText, TextToSpeech};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Transcribes audio files with `/audio/transcriptions`.
pub struct OpenAiSpeechToText {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiSpeechToText {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: http::client(Duration::from_secs(120)),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl SpeechToText for OpenAiSpeechToText {
    async fn transcribe(&self, audio: &Path) -> Result<String, SpeechError> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".into());

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        debug!(model = %self.model, file = %audio.display(), "Transcribing audio");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SpeechError::Transcription(http::send_error(e).to_string()))?;
        let response = http::check_status("whisper", response)
            .await
            .map_err(|e| SpeechError::Transcription(e.to_string()))?;

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::Transcription(format!("Failed to parse response: {e}")))?;
        Ok(body.text)
    }
}

/// Synthesizes speech with `/audio/speech` into an aac temp file.
pub struct OpenAiTextToSpeech {
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl OpenAiTextToSpeech {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            client: http::client(Duration::from_secs(120)),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": "aac",
        })
    }
}

fn synthesis_error(e: ProviderError) -> SpeechError {
    SpeechError::Synthesis(e.to_string())
}

#[async_trait]
impl TextToSpeech for OpenAiTextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<MediaFile, SpeechError> {
        debug!(model = %self.model, voice = %self.voice, chars = text.len(), "Synthesizing speech");

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| synthesis_error(http::send_error(e)))?;
        let response = http::check_status("tts", response)
            .await
            .map_err(synthesis_error)?;

        let audio = response
            .bytes()
            .await
            .map_err(|e| synthesis_error(http::send_error(e)))?;

        let path = temp_path("aac");
        if let Err(e) = tokio::fs::write(&path, &audio).await {
            CleanupHandle::remove_file(&path).run();
            return Err(e.into());
        }
        Ok(MediaFile::temporary(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tts_body_requests_aac() {
        let tts = OpenAiTextToSpeech::new("sk", "tts-1", "nova");
        let body = tts.request_body("hello");
        assert_eq!(body["model"], "tts-1");
        assert_eq!(body["voice"], "nova");
        assert_eq!(body["input"], "hello");
        assert_eq!(body["response_format"], "aac");
    }

    #[tokio::test]
    async fn missing_audio_file_is_io_error() {
        let stt = OpenAiSpeechToText::new("sk", "whisper-1").with_base_url("http://127.0.0.1:9");
        let err = stt
            .transcribe(Path::new("/nonexistent/voice.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::Io(_)));
    }

    #[test]
    fn temp_paths_are_unique() {
        assert_ne!(temp_path("aac"), temp_path("aac"));
        assert_eq!(temp_path("mp3").extension().unwrap(), "mp3");
    }
}
