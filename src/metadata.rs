//! Video metadata as fetched from the platform, and the JSON record embedded
//! into the comment tag of every downloaded file.
//!
//! The embedded field names (`ytid`, `uploadedAt`, ...) are read by other
//! tools and must not change.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quality::StreamDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Everything the downloader needs to know about one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDescriptor {
    pub id: String,
    pub title: String,
    pub description: String,
    pub channel: ChannelInfo,
    /// Length in seconds; unknown for live streams.
    pub duration: Option<u64>,
    pub url: String,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Record serialized into the comment tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedMetadata {
    pub ytid: String,
    pub title: String,
    pub channel: ChannelInfo,
    pub duration: Option<String>,
    pub url: String,
    #[serde(rename = "uploadedAt")]
    pub uploaded_at: Option<DateTime<Utc>>,
    pub quality: String,
    pub format: String,
}

impl EmbeddedMetadata {
    /// Describes `video` as downloaded through `stream`.
    pub fn of(video: &VideoDescriptor, stream: &StreamDescriptor) -> Self {
        Self {
            ytid: video.id.clone(),
            title: video.title.clone(),
            channel: video.channel.clone(),
            duration: video.duration.map(format_duration),
            url: video.url.clone(),
            uploaded_at: video.uploaded_at,
            quality: stream
                .video_quality()
                .map(|quality| quality.label.clone())
                .unwrap_or_default(),
            format: stream.container.name().to_string(),
        }
    }

    pub fn to_comment(&self) -> Result<String> {
        serde_json::to_string(self).context("serializing embedded metadata")
    }

    pub fn from_comment(comment: &str) -> Result<Self> {
        serde_json::from_str(comment).context("parsing embedded metadata")
    }
}

/// Pretty-prints a comment tag for the terminal. Anything that is not JSON is
/// returned unchanged.
pub fn pretty_comment(comment: &str) -> String {
    serde_json::from_str::<serde_json::Value>(comment)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| comment.to_string())
}

/// Renders a duration as `HH:MM:SS`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
