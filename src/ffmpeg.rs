use crate::error::AppError;
use async_trait::async_trait;
use std::{
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    str::FromStr,
};
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

const FFMPEG: &str = "ffmpeg";
const FFMPEG_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

/// Audio container produced for audio-only requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AudioFormat {
    Mp3,
    M4a,
    Opus,
    Wav,
    Flac,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Opus => "opus",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
        }
    }

    pub fn label(self) -> String {
        self.extension().to_uppercase()
    }

    fn codec_args(self) -> &'static [&'static str] {
        match self {
            AudioFormat::Mp3 => &[
                "-c:a", "libmp3lame", "-b:a", "320k", "-ac", "2", "-ar", "44100", "-f", "mp3",
            ],
            AudioFormat::M4a => &["-c:a", "aac", "-b:a", "256k", "-ac", "2", "-f", "ipod"],
            AudioFormat::Opus => &["-c:a", "libopus", "-b:a", "160k", "-f", "opus"],
            AudioFormat::Wav => &["-c:a", "pcm_s16le", "-ac", "2", "-ar", "44100", "-f", "wav"],
            AudioFormat::Flac => &["-c:a", "flac", "-f", "flac"],
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "m4a" | "aac" => Ok(AudioFormat::M4a),
            "opus" => Ok(AudioFormat::Opus),
            "wav" => Ok(AudioFormat::Wav),
            "flac" => Ok(AudioFormat::Flac),
            other => Err(AppError::Config(format!("unsupported audio format: {other}"))),
        }
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encodes `input` into `<output_dir>/<stem>.<ext>` and returns that path.
    async fn transcode(
        &self,
        input: &Path,
        output_dir: &Path,
        stem: &str,
        target: AudioFormat,
    ) -> Result<PathBuf, AppError>;
}

#[derive(Default)]
pub struct Ffmpeg;

impl Ffmpeg {
    /// Fails if the `ffmpeg` binary cannot be run.
    pub async fn check_available() -> Result<(), AppError> {
        let status = Command::new(FFMPEG)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(AppError::Ffmpeg(format!("ffmpeg -version exited with {status}")))
        }
    }
}

fn transcode_args(input: &Path, output: &Path, target: AudioFormat) -> Vec<OsString> {
    let mut args: Vec<OsString> = FFMPEG_DEFAULT_ARGS.iter().map(OsString::from).collect();
    args.push("-y".into());
    args.push("-i".into());
    args.push(input.as_os_str().to_owned());
    args.push("-vn".into());
    args.extend(target.codec_args().iter().map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

#[async_trait]
impl Transcoder for Ffmpeg {
    #[instrument(skip(self))]
    async fn transcode(
        &self,
        input: &Path,
        output_dir: &Path,
        stem: &str,
        target: AudioFormat,
    ) -> Result<PathBuf, AppError> {
        tokio::fs::create_dir_all(output_dir).await?;
        let output = output_dir.join(format!("{stem}.{}", target.extension()));
        info!(
            event = "transcode_start",
            input = %input.display(),
            output = %output.display()
        );

        let result = Command::new(FFMPEG)
            .args(transcode_args(input, &output, target))
            .stdin(Stdio::null())
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            error!(
                event = "transcode_failed",
                status = %result.status,
                stderr = %stderr.trim()
            );
            if let Err(err) = tokio::fs::remove_file(&output).await {
                debug!(event = "transcode_cleanup_skipped", error = %err);
            }
            return Err(AppError::Ffmpeg(stderr.trim().to_string()));
        }

        info!(event = "transcode_complete", output = %output.display());
        Ok(output)
    }
}
