#![forbid(unsafe_code)]

//! Single-video download: resolve, pick streams, mux, tag.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing::info;

use crate::metadata::EmbeddedMetadata;
use crate::platform::{DownloadRequest, PlatformClient};
use crate::quality::{Container, QualityCeiling, select_streams};
use crate::sanitize::output_file_name;
use crate::tags::{MediaTags, TagWriter};

/// Every download is muxed into mp4; the file name scanner relies on it.
pub const TARGET_CONTAINER: Container = Container::Mp4;

/// Encoder speed/size tradeoff handed to ffmpeg while muxing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "PascalCase")]
pub enum ConversionPreset {
    VerySlow,
    Slow,
    #[default]
    Medium,
    Fast,
    VeryFast,
    UltraFast,
}

impl ConversionPreset {
    /// The x264 preset name.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            ConversionPreset::VerySlow => "veryslow",
            ConversionPreset::Slow => "slow",
            ConversionPreset::Medium => "medium",
            ConversionPreset::Fast => "fast",
            ConversionPreset::VeryFast => "veryfast",
            ConversionPreset::UltraFast => "ultrafast",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Video URL or bare id.
    pub video: String,
    pub output_dir: PathBuf,
    pub quality: QualityCeiling,
    pub preset: ConversionPreset,
}

/// Downloads one video into `task.output_dir` and returns the written path.
///
/// Nothing is caught here; every failure goes back to the caller, which
/// decides whether the run continues.
pub async fn download_video(
    client: &dyn PlatformClient,
    tagger: &dyn TagWriter,
    task: &DownloadTask,
) -> Result<PathBuf> {
    let video = client.resolve_video(&task.video).await?;
    let streams = client.stream_manifest(&video).await?;
    let selected = select_streams(&streams, &TARGET_CONTAINER, task.quality)
        .with_context(|| format!("selecting streams for {}", video.id))?;

    let file_name = output_file_name(
        &video.channel.title,
        &video.title,
        &selected.video_quality,
        &video.id,
        &TARGET_CONTAINER,
    );
    let output = absolute_dir(&task.output_dir)?.join(file_name);

    print!("=> {} - {} - {} ... ", video.id, video.channel.title, video.title);
    std::io::stdout()
        .flush()
        .context("flushing progress line")?;

    info!(
        id = %video.id,
        video = %selected.video.format_id,
        audio = %selected.audio.format_id,
        quality = %selected.video_quality,
        "downloading"
    );
    let request = DownloadRequest {
        video: &video,
        output: &output,
        container: &TARGET_CONTAINER,
        preset: task.preset,
    };
    client
        .download(&[selected.audio, selected.video], &request)
        .await?;

    let comment = EmbeddedMetadata::of(&video, selected.video).to_comment()?;
    let tags = MediaTags {
        title: video.title.clone(),
        description: video.description.clone(),
        comment,
    };
    tagger.write_tags(&output, &tags).await?;

    println!("OK");
    Ok(output)
}

fn absolute_dir(dir: &Path) -> Result<PathBuf> {
    std::path::absolute(dir).with_context(|| format!("resolving {}", dir.display()))
}
