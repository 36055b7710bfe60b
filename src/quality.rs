#![forbid(unsafe_code)]

//! Stream descriptors and the policy that picks one audio and one video
//! stream for a download.

use std::{fmt, str::FromStr, sync::LazyLock};

use clap::ValueEnum;
use regex::Regex;
use tracing::debug;

use crate::error::{InvalidQuality, QualityLabelError, SelectionError};

static QUALITY_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2,4})p(\d{2})?$").expect("quality label pattern is valid")
});

/// Highest resolution the user is willing to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, ValueEnum)]
pub enum QualityCeiling {
    #[value(name = "240p")]
    P240,
    #[value(name = "360p")]
    P360,
    #[value(name = "480p")]
    P480,
    #[default]
    #[value(name = "720p")]
    P720,
    #[value(name = "1080p")]
    P1080,
    #[value(name = "1440p")]
    P1440,
    #[value(name = "2160p")]
    P2160,
    #[value(name = "4320p")]
    P4320,
}

impl QualityCeiling {
    pub const ALL: [QualityCeiling; 8] = [
        QualityCeiling::P4320,
        QualityCeiling::P2160,
        QualityCeiling::P1440,
        QualityCeiling::P1080,
        QualityCeiling::P720,
        QualityCeiling::P480,
        QualityCeiling::P360,
        QualityCeiling::P240,
    ];

    pub fn max_height(self) -> u32 {
        match self {
            QualityCeiling::P240 => 240,
            QualityCeiling::P360 => 360,
            QualityCeiling::P480 => 480,
            QualityCeiling::P720 => 720,
            QualityCeiling::P1080 => 1080,
            QualityCeiling::P1440 => 1440,
            QualityCeiling::P2160 => 2160,
            QualityCeiling::P4320 => 4320,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QualityCeiling::P240 => "240p",
            QualityCeiling::P360 => "360p",
            QualityCeiling::P480 => "480p",
            QualityCeiling::P720 => "720p",
            QualityCeiling::P1080 => "1080p",
            QualityCeiling::P1440 => "1440p",
            QualityCeiling::P2160 => "2160p",
            QualityCeiling::P4320 => "4320p",
        }
    }
}

impl fmt::Display for QualityCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QualityCeiling {
    type Err = InvalidQuality;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|ceiling| ceiling.label() == trimmed)
            .ok_or_else(|| InvalidQuality(value.to_string()))
    }
}

/// A parsed video quality label such as `720p` or `1080p60`.
///
/// [`QualityLabel::sort_key`] is the decimal reading of the label (`1080p60`
/// is `1080.60`), which always agrees with comparing the height prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualityLabel {
    label: String,
    height: u32,
    framerate: Option<u32>,
}

impl QualityLabel {
    pub fn parse(label: &str) -> Result<Self, QualityLabelError> {
        let caps = QUALITY_LABEL
            .captures(label)
            .ok_or_else(|| QualityLabelError(label.to_string()))?;
        let height: u32 = caps[1]
            .parse()
            .map_err(|_| QualityLabelError(label.to_string()))?;
        let framerate: Option<u32> = caps
            .get(2)
            .map(|m| m.as_str().parse())
            .transpose()
            .map_err(|_| QualityLabelError(label.to_string()))?;
        Ok(Self {
            label: label.to_string(),
            height,
            framerate,
        })
    }

    /// Builds the label the platform shows for a stream: the height, with
    /// the frame rate appended when it is above 30 fps.
    pub fn from_height(height: u32, fps: Option<f64>) -> Self {
        let framerate = fps
            .map(|fps| fps.round() as u32)
            .filter(|fps| *fps > 30 && *fps < 100);
        let label = match framerate {
            Some(fps) => format!("{height}p{fps}"),
            None => format!("{height}p"),
        };
        Self {
            label,
            height,
            framerate,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.label
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sort_key(&self) -> f64 {
        f64::from(self.height) + f64::from(self.framerate.unwrap_or(0)) / 100.0
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Media container of a stream or of the produced file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Container {
    Mp4,
    WebM,
    Other(String),
}

impl Container {
    /// Maps a yt-dlp `ext` to a container; audio-only mp4 streams use `m4a`.
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim().to_ascii_lowercase().as_str() {
            "mp4" | "m4a" => Container::Mp4,
            "webm" => Container::WebM,
            other => Container::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Container::Mp4 => "mp4",
            Container::WebM => "webm",
            Container::Other(name) => name,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoQuality {
    pub label: String,
    pub max_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRole {
    AudioOnly,
    VideoOnly(VideoQuality),
}

/// One entry of a video's stream manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Platform handle used to request this stream for download.
    pub format_id: String,
    pub container: Container,
    /// Bits per second.
    pub bitrate: u64,
    pub role: StreamRole,
}

impl StreamDescriptor {
    pub fn video_quality(&self) -> Option<&VideoQuality> {
        match &self.role {
            StreamRole::VideoOnly(quality) => Some(quality),
            StreamRole::AudioOnly => None,
        }
    }
}

/// The pair of streams that get muxed into the output file.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedStreams<'a> {
    pub audio: &'a StreamDescriptor,
    pub video: &'a StreamDescriptor,
    pub video_quality: QualityLabel,
}

pub fn select_streams<'a>(
    streams: &'a [StreamDescriptor],
    container: &Container,
    ceiling: QualityCeiling,
) -> Result<SelectedStreams<'a>, SelectionError> {
    let audio = select_audio(streams, container)?;
    let (video, video_quality) = select_video(streams, container, ceiling)?;
    Ok(SelectedStreams {
        audio,
        video,
        video_quality,
    })
}

/// Highest-bitrate audio-only stream in `container`.
pub fn select_audio<'a>(
    streams: &'a [StreamDescriptor],
    container: &Container,
) -> Result<&'a StreamDescriptor, SelectionError> {
    streams
        .iter()
        .filter(|stream| stream.role == StreamRole::AudioOnly && &stream.container == container)
        .max_by_key(|stream| stream.bitrate)
        .ok_or_else(|| SelectionError::NoAudioStream {
            container: container.to_string(),
        })
}

/// Best video-only stream in `container` whose height does not exceed the
/// ceiling. Never falls back to a larger stream.
pub fn select_video<'a>(
    streams: &'a [StreamDescriptor],
    container: &Container,
    ceiling: QualityCeiling,
) -> Result<(&'a StreamDescriptor, QualityLabel), SelectionError> {
    let mut candidates = Vec::new();
    let mut malformed = None;
    for stream in streams.iter().filter(|stream| &stream.container == container) {
        if let StreamRole::VideoOnly(quality) = &stream.role {
            match QualityLabel::parse(&quality.label) {
                Ok(label) => candidates.push((stream, quality, label)),
                Err(err) => {
                    debug!(format = %stream.format_id, label = %quality.label, "ignoring stream");
                    malformed.get_or_insert(err);
                }
            }
        }
    }
    // Only an error when there was nothing usable to choose from.
    if candidates.is_empty()
        && let Some(err) = malformed
    {
        return Err(err.into());
    }

    candidates.sort_by(|(a, _, a_label), (b, _, b_label)| {
        b_label
            .sort_key()
            .total_cmp(&a_label.sort_key())
            .then_with(|| b.bitrate.cmp(&a.bitrate))
    });

    let available = candidates
        .iter()
        .map(|(_, _, label)| label.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    candidates
        .into_iter()
        .find(|(_, quality, _)| quality.max_height <= ceiling.max_height())
        .map(|(stream, _, label)| (stream, label))
        .ok_or_else(|| SelectionError::NoVideoStream {
            container: container.to_string(),
            ceiling: ceiling.to_string(),
            available: if available.is_empty() {
                "none".to_string()
            } else {
                available
            },
        })
}
