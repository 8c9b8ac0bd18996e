//! Audio normalization through an external ffmpeg binary.

use super::temp_path;
use async_trait::async_trait;
use parley_core::error::SpeechError;
use parley_core::scope::{CleanupHandle, MediaFile};
use parley_core::speech::AudioTranscoder;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct FfmpegTranscoder {
    binary: String,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments converting `input` into 44.1 kHz stereo 192k mp3 at `output`.
    fn args(input: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec!["-y".into(), "-i".into(), input.into()];
        for arg in ["-vn", "-ar", "44100", "-ac", "2", "-ab", "192k", "-f", "mp3"] {
            args.push(arg.into());
        }
        args.push(output.into());
        args
    }

    /// Whether the binary can be executed at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn to_mp3(&self, input: &Path) -> Result<MediaFile, SpeechError> {
        let output = temp_path("mp3");
        debug!(input = %input.display(), output = %output.display(), "Transcoding audio");

        let result = Command::new(&self.binary)
            .args(Self::args(input, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(e) => {
                return Err(SpeechError::Transcode(format!(
                    "failed to run {}: {e}",
                    self.binary
                )));
            }
        };

        if !out.status.success() {
            // ffmpeg may leave a partial file behind
            CleanupHandle::remove_file(&output).run();
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail: String = stderr.lines().last().unwrap_or_default().to_string();
            warn!(code = ?out.status.code(), error = %tail, "ffmpeg failed");
            return Err(SpeechError::Transcode(tail));
        }

        Ok(MediaFile::temporary(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_match_mp3_profile() {
        let args = FfmpegTranscoder::args(Path::new("in.oga"), Path::new("out.mp3"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-y", "-i", "in.oga", "-vn", "-ar", "44100", "-ac", "2", "-ab", "192k", "-f",
                "mp3", "out.mp3"
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_transcode_error() {
        let t = FfmpegTranscoder::new("/nonexistent/ffmpeg-binary");
        assert!(!t.is_available().await);
        let err = t.to_mp3(Path::new("/tmp/in.oga")).await.unwrap_err();
        assert!(matches!(err, SpeechError::Transcode(_)));
    }
}
