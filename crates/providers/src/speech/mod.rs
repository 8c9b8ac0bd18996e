//! Speech collaborators: OpenAI Whisper / TTS and an ffmpeg transcoder.

pub mod ffmpeg;
pub mod openai;

pub use ffmpeg::FfmpegTranscoder;
pub use openai::{OpenAiSpeechToText, OpenAiTextToSpeech};

use parley_core::speech::{AudioTranscoder, SpeechToText, TextToSpeech};
use std::path::PathBuf;
use std::sync::Arc;

/// The three speech collaborators the dispatcher needs for voice turns.
#[derive(Clone)]
pub struct SpeechServices {
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub transcoder: Arc<dyn AudioTranscoder>,
}

/// A fresh, unique path in the system temp dir with the given extension.
pub(crate) fn temp_path(extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!("parley-{}.{extension}", uuid::Uuid::new_v4()))
}
