#![forbid(unsafe_code)]

//! Typed failures raised by the library. Orchestration code wraps these in
//! `anyhow::Error` so callers only need to decide whether to recover.

use std::path::PathBuf;

use thiserror::Error;

/// A quality label that does not look like `720p` or `1080p60`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid video quality label {0:?}")]
pub struct QualityLabelError(pub String);

/// A requested ceiling outside of the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quality {0:?}; choose one of 4320p, 2160p, 1440p, 1080p, 720p, 480p, 360p or 240p")]
pub struct InvalidQuality(pub String);

/// Stream selection failures for a single video.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no audio-only {container} stream available")]
    NoAudioStream { container: String },
    #[error("no {container} video stream at or below {ceiling} (available: {available})")]
    NoVideoStream {
        container: String,
        ceiling: String,
        available: String,
    },
    #[error(transparent)]
    Label(#[from] QualityLabelError),
}

/// Failures of the external programs (yt-dlp, ffmpeg, ffprobe).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{program} is not installed or not in PATH: {source}")]
    Missing {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} {action} failed (status {status}){detail}")]
    Failed {
        program: String,
        action: String,
        status: std::process::ExitStatus,
        detail: String,
    },
    #[error("{program} did not produce {}", path.display())]
    MissingOutput { program: String, path: PathBuf },
}

impl ToolError {
    /// Builds a [`ToolError::Failed`] keeping the last stderr line, which is
    /// where yt-dlp and ffmpeg put the actual reason.
    pub fn failed(
        program: impl Into<String>,
        action: impl Into<String>,
        status: std::process::ExitStatus,
        stderr: &[u8],
    ) -> Self {
        let stderr = String::from_utf8_lossy(stderr);
        let detail = stderr
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(|line| format!(": {line}"))
            .unwrap_or_default();
        Self::Failed {
            program: program.into(),
            action: action.into(),
            status,
            detail,
        }
    }
}
