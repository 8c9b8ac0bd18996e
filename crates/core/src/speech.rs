//! Speech collaborators: speech-to-text, text-to-speech and audio transcoding.
//!
//! All three wrap external services or tools. Failures come back as
//! [`SpeechError`]; the dispatch core treats a failed transcription as
//! "no text produced" and a failed synthesis as "no voice reply".

use async_trait::async_trait;
use std::path::Path;

use crate::error::SpeechError;
use crate::scope::MediaFile;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe an audio file into text.
    async fn transcribe(&self, audio: &Path) -> Result<String, SpeechError>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize speech into a temp file owned by the returned [`MediaFile`].
    async fn synthesize(&self, text: &str) -> Result<MediaFile, SpeechError>;
}

#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    /// Convert an arbitrary audio container into mp3 for transcription.
    async fn to_mp3(&self, input: &Path) -> Result<MediaFile, SpeechError>;
}
