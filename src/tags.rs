#![forbid(unsafe_code)]

//! Writing and reading container tags on downloaded files.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::ToolError;

/// Tags applied to a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTags {
    pub title: String,
    pub description: String,
    pub comment: String,
}

#[async_trait]
pub trait TagWriter: Send + Sync {
    /// Replaces the title, description and comment tags of `path`.
    async fn write_tags(&self, path: &Path, tags: &MediaTags) -> Result<()>;

    /// Returns the comment tag, or `None` if the file has none.
    async fn read_comment(&self, path: &Path) -> Result<Option<String>>;
}

/// Tags files by remuxing them through ffmpeg and reads them back with
/// ffprobe.
#[derive(Debug, Clone)]
pub struct FfmpegTagger {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTagger {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

/// Sibling path the tagged copy is written to before it replaces the
/// original. Keeps the extension so ffmpeg picks the same muxer.
fn staging_path(path: &Path) -> Result<PathBuf> {
    let Some(file_name) = path.file_name() else {
        bail!("{} has no file name", path.display());
    };
    let mut staged = OsString::from(".");
    staged.push(file_name);
    staged.push(".tagging");
    if let Some(ext) = path.extension() {
        staged.push(".");
        staged.push(ext);
    }
    Ok(path.with_file_name(staged))
}

async fn run_tool(program: &Path, command: &mut Command, action: &str) -> Result<Vec<u8>> {
    let name = program.display().to_string();
    let output = match command.output().await {
        Ok(output) => output,
        Err(source) if source.kind() == ErrorKind::NotFound => {
            return Err(ToolError::Missing {
                program: name,
                source,
            }
            .into());
        }
        Err(err) => return Err(err).with_context(|| format!("running {name}")),
    };
    if !output.status.success() {
        return Err(ToolError::failed(name, action, output.status, &output.stderr).into());
    }
    Ok(output.stdout)
}

#[async_trait]
impl TagWriter for FfmpegTagger {
    async fn write_tags(&self, path: &Path, tags: &MediaTags) -> Result<()> {
        let staged = staging_path(path)?;
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
            .arg(path)
            .args(["-map", "0", "-c", "copy", "-map_metadata", "0"])
            .arg("-metadata")
            .arg(format!("title={}", tags.title))
            .arg("-metadata")
            .arg(format!("description={}", tags.description))
            .arg("-metadata")
            .arg(format!("comment={}", tags.comment))
            .arg(&staged)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!(path = %path.display(), "writing tags");

        if let Err(err) = run_tool(&self.ffmpeg, &mut command, "tagging").await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(err.context(format!("tagging {}", path.display())));
        }
        if !tokio::fs::try_exists(&staged).await.unwrap_or(false) {
            return Err(ToolError::MissingOutput {
                program: self.ffmpeg.display().to_string(),
                path: staged,
            }
            .into());
        }
        tokio::fs::rename(&staged, path)
            .await
            .with_context(|| format!("replacing {} with tagged copy", path.display()))
    }

    async fn read_comment(&self, path: &Path) -> Result<Option<String>> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args([
                "-v",
                "error",
                "-show_entries",
                "format_tags=comment",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let stdout = run_tool(&self.ffprobe, &mut command, "tag read")
            .await
            .with_context(|| format!("reading tags of {}", path.display()))?;
        parse_probe_comment(&stdout)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

fn parse_probe_comment(stdout: &[u8]) -> Result<Option<String>> {
    let probe: ProbeOutput =
        serde_json::from_slice(stdout).context("parsing ffprobe output")?;
    // Some muxers report the key in upper case.
    Ok(probe
        .format
        .tags
        .into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("comment"))
        .map(|(_, value)| value))
}
