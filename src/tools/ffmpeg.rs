use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::TransferError;
use crate::ports::conversion::{AudioFormat, Converter};

/// Result of one conversion, reported separately from the download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionOutcome {
    pub source: PathBuf,
    pub output: PathBuf,
    pub format: AudioFormat,
    pub error: Option<String>,
}

impl ConversionOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

enum Message {
    Convert(PathBuf, AudioFormat),
    Finish,
}

/// Find ffmpeg: the configured binary if set, otherwise on PATH.
pub fn locate_ffmpeg(configured: Option<&Path>) -> Result<PathBuf, TransferError> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(TransferError::config(format!(
            "path_binary_ffmpeg {path:?} does not exist"
        ))),
        None => which::which("ffmpeg").map_err(|_| {
            TransferError::config(
                "ffmpeg not found in PATH. Install it or set path_binary_ffmpeg in the config",
            )
        }),
    }
}

fn codec_args(format: AudioFormat) -> &'static [&'static str] {
    match format {
        AudioFormat::Mp3 => &["-codec:a", "libmp3lame", "-qscale:a", "2"],
        AudioFormat::Flac => &["-codec:a", "flac"],
        AudioFormat::M4a => &["-codec:a", "aac", "-b:a", "320k"],
    }
}

/// Output muxer, given explicitly since the staging name hides the extension.
fn muxer(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Mp3 => "mp3",
        AudioFormat::Flac => "flac",
        AudioFormat::M4a => "ipod",
    }
}

/// ffmpeg writes here first so a failed or interrupted run never leaves a
/// truncated file at the real output path.
fn staging_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn run_ffmpeg(binary: &Path, input: &Path, output: &Path, format: AudioFormat) -> Result<(), String> {
    let result = tokio::process::Command::new(binary)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(codec_args(format))
        .arg("-f")
        .arg(muxer(format))
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| format!("failed to start {binary:?}: {err}"))?;

    if result.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&result.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(3).collect();
    Err(format!(
        "ffmpeg exited with {}: {}",
        result.status,
        tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
    ))
}

async fn convert_one(
    binary: &Path,
    source: PathBuf,
    format: AudioFormat,
    delete_original: bool,
) -> ConversionOutcome {
    let output = source.with_extension(format.extension());
    let staging = staging_path(&output);
    tracing::info!("Converting {:?} to {}", source, format);

    let mut result = run_ffmpeg(binary, &source, &staging, format).await;
    if result.is_ok() {
        result = tokio::fs::rename(&staging, &output)
            .await
            .map_err(|err| format!("could not move {staging:?} into place: {err}"));
    }

    let error = match result {
        Ok(()) => {
            if delete_original && let Err(err) = tokio::fs::remove_file(&source).await {
                tracing::warn!("Converted {:?} but could not delete original: {}", source, err);
            }
            tracing::info!("Converted {:?}", output);
            None
        }
        Err(err) => {
            if let Err(remove_err) = tokio::fs::remove_file(&staging).await
                && remove_err.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!("Could not remove {:?}: {}", staging, remove_err);
            }
            tracing::error!("Conversion of {:?} failed: {}", source, err);
            Some(err)
        }
    };

    ConversionOutcome {
        source,
        output,
        format,
        error,
    }
}

/// Converts finished downloads with ffmpeg on a single background task.
///
/// Requests are queued and handled one at a time; `finish` waits for the
/// queue to drain and returns every outcome.
pub struct FfmpegConverter {
    sender: mpsc::UnboundedSender<Message>,
    task: Mutex<Option<JoinHandle<Vec<ConversionOutcome>>>>,
}

impl FfmpegConverter {
    pub fn spawn(binary: PathBuf, delete_original: bool) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut outcomes = Vec::new();
            while let Some(message) = receiver.recv().await {
                match message {
                    Message::Convert(source, format) => {
                        outcomes.push(convert_one(&binary, source, format, delete_original).await);
                    }
                    Message::Finish => break,
                }
            }
            outcomes
        });

        Self {
            sender,
            task: Mutex::new(Some(task)),
        }
    }

    /// Wait for every queued conversion. Later submissions are ignored.
    pub async fn finish(&self) -> Vec<ConversionOutcome> {
        let _ = self.sender.send(Message::Finish);
        let Some(task) = self.task.lock().await.take() else {
            return Vec::new();
        };
        match task.await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                tracing::error!("Conversion task crashed: {}", err);
                Vec::new()
            }
        }
    }
}

impl Converter for FfmpegConverter {
    fn submit(&self, path: PathBuf, format: AudioFormat) {
        if self.sender.send(Message::Convert(path, format)).is_err() {
            tracing::warn!("Conversion requested after the converter finished");
        }
    }
}
