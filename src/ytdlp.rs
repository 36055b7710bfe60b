#![forbid(unsafe_code)]

//! [`PlatformClient`] backed by the `yt-dlp` executable.
//!
//! Metadata comes from `--dump-single-json`; playlists are paged with
//! `--flat-playlist --playlist-items a:b` so a limited run never lists more
//! than it needs. Downloads let yt-dlp fetch both streams and merge them with
//! ffmpeg.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

use crate::config::ToolPaths;
use crate::error::ToolError;
use crate::metadata::{ChannelInfo, VideoDescriptor};
use crate::platform::{
    DownloadRequest, PlatformClient, PlaylistBatch, PlaylistDescriptor, PlaylistEntry,
};
use crate::quality::{Container, QualityLabel, StreamDescriptor, StreamRole, VideoQuality};

pub const PLAYLIST_BATCH_SIZE: usize = 50;

const PROGRAM: &str = "yt-dlp";

pub struct YtDlpClient {
    tools: ToolPaths,
    /// Manifests parsed while resolving a video, handed out once by
    /// `stream_manifest`.
    manifests: Mutex<HashMap<String, Vec<StreamDescriptor>>>,
}

impl YtDlpClient {
    pub fn new(tools: ToolPaths) -> Self {
        Self {
            tools,
            manifests: Mutex::new(HashMap::new()),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.tools.yt_dlp);
        command
            .arg("--no-warnings")
            .arg("--ignore-config")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cookies) = &self.tools.cookies
            && cookies.exists()
        {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    async fn run(&self, mut command: Command, action: &str) -> Result<Vec<u8>> {
        debug!(?command, "running yt-dlp");
        let output = match command.output().await {
            Ok(output) => output,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ToolError::Missing {
                    program: PROGRAM.into(),
                    source: err,
                }
                .into());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("running {PROGRAM} for {action}"));
            }
        };
        if !output.status.success() {
            return Err(ToolError::failed(PROGRAM, action, output.status, &output.stderr).into());
        }
        Ok(output.stdout)
    }

    async fn dump_json<T, I, S>(&self, args: I, action: &str) -> Result<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = self.command();
        command.arg("--dump-single-json").args(args);
        let stdout = self.run(command, action).await?;
        serde_json::from_slice(&stdout).with_context(|| format!("parsing {PROGRAM} {action} output"))
    }
}

#[async_trait]
impl PlatformClient for YtDlpClient {
    async fn resolve_video(&self, url: &str) -> Result<VideoDescriptor> {
        let url = video_url(url);
        let info: VideoInfo = self
            .dump_json(["--no-playlist", "--skip-download", url.as_str()], "video lookup")
            .await
            .with_context(|| format!("resolving video {url}"))?;
        let (video, streams) = info.into_parts()?;
        self.manifests.lock().insert(video.id.clone(), streams);
        Ok(video)
    }

    async fn stream_manifest(&self, video: &VideoDescriptor) -> Result<Vec<StreamDescriptor>> {
        if let Some(streams) = self.manifests.lock().remove(&video.id) {
            return Ok(streams);
        }
        let info: VideoInfo = self
            .dump_json(
                ["--no-playlist", "--skip-download", video.url.as_str()],
                "stream manifest",
            )
            .await
            .with_context(|| format!("fetching streams for {}", video.id))?;
        Ok(info.into_parts()?.1)
    }

    async fn resolve_playlist(&self, url: &str) -> Result<PlaylistDescriptor> {
        let url = playlist_url(url);
        let info: PlaylistInfo = self
            .dump_json(
                ["--flat-playlist", "--playlist-items", "1", url.as_str()],
                "playlist lookup",
            )
            .await
            .with_context(|| format!("resolving playlist {url}"))?;
        if info.kind.as_deref() != Some("playlist") {
            bail!("{url} is not a playlist");
        }
        Ok(PlaylistDescriptor {
            id: info.id.unwrap_or_else(|| url.clone()),
            title: info.title,
            url: info.webpage_url.unwrap_or(url),
        })
    }

    async fn playlist_batch(
        &self,
        playlist: &PlaylistDescriptor,
        offset: usize,
    ) -> Result<PlaylistBatch> {
        let range = format!("{}:{}", offset + 1, offset + PLAYLIST_BATCH_SIZE);
        let info: PlaylistInfo = self
            .dump_json(
                [
                    "--flat-playlist",
                    "--playlist-items",
                    range.as_str(),
                    playlist.url.as_str(),
                ],
                "playlist page",
            )
            .await
            .with_context(|| format!("listing {} items {range}", playlist.id))?;
        Ok(info.into_batch())
    }

    async fn download(
        &self,
        streams: &[&StreamDescriptor],
        request: &DownloadRequest<'_>,
    ) -> Result<()> {
        if streams.is_empty() {
            bail!("no streams requested for {}", request.video.id);
        }
        let format = format_selector(streams);
        let postprocessor = format!("Merger+ffmpeg_o:-preset {}", request.preset.ffmpeg_name());

        let mut command = self.command();
        command
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("--quiet")
            .arg("--format")
            .arg(&format)
            .arg("--merge-output-format")
            .arg(request.container.name())
            .arg("--postprocessor-args")
            .arg(&postprocessor)
            .arg("--output")
            .arg(output_template(request.output))
            .arg("--force-overwrites");
        if self.tools.ffmpeg.components().count() > 1 {
            command.arg("--ffmpeg-location").arg(&self.tools.ffmpeg);
        }
        command.arg(&request.video.url);

        self.run(command, "download")
            .await
            .with_context(|| format!("downloading {} ({format})", request.video.id))?;

        if !request.output.exists() {
            return Err(ToolError::MissingOutput {
                program: PROGRAM.into(),
                path: request.output.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }
}

/// Accepts a full URL or a bare video id.
pub fn video_url(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://www.youtube.com/watch?v={trimmed}")
    }
}

/// Accepts a full URL or a bare playlist id.
pub fn playlist_url(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://www.youtube.com/playlist?list={trimmed}")
    }
}

/// yt-dlp wants the video stream first in a merge selector (`137+140`).
fn format_selector(streams: &[&StreamDescriptor]) -> String {
    let mut ordered: Vec<&StreamDescriptor> = streams.to_vec();
    ordered.sort_by_key(|stream| matches!(stream.role, StreamRole::AudioOnly));
    ordered
        .iter()
        .map(|stream| stream.format_id.as_str())
        .collect::<Vec<_>>()
        .join("+")
}

/// `%` starts a field in yt-dlp output templates.
fn output_template(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('%', "%%")
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            OneOrMany::One(value) => Box::new(std::iter::once(value)),
            OneOrMany::Many(values) => Box::new(values.iter()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum CreatorInfo {
    Name(String),
    Object {
        name: Option<String>,
        title: Option<String>,
        url: Option<String>,
        id: Option<String>,
    },
}

impl CreatorInfo {
    fn name(&self) -> Option<&str> {
        match self {
            CreatorInfo::Name(value) => Some(value.as_str()),
            CreatorInfo::Object { name, title, .. } => name.as_deref().or(title.as_deref()),
        }
    }

    fn url(&self) -> Option<&str> {
        match self {
            CreatorInfo::Name(_) => None,
            CreatorInfo::Object { url, .. } => url.as_deref(),
        }
    }

    fn id(&self) -> Option<&str> {
        match self {
            CreatorInfo::Name(_) => None,
            CreatorInfo::Object { id, .. } => id.as_deref(),
        }
    }
}

fn first_string(value: &Option<OneOrMany<String>>) -> Option<&str> {
    value
        .as_ref()
        .and_then(|value| value.iter().map(String::as_str).find(|s| !s.trim().is_empty()))
}

fn first_creator<'a>(
    value: &'a Option<OneOrMany<CreatorInfo>>,
    field: impl Fn(&'a CreatorInfo) -> Option<&'a str>,
) -> Option<&'a str> {
    value
        .as_ref()
        .and_then(|value| value.iter().filter_map(field).find(|s| !s.trim().is_empty()))
}

/// Subset of `yt-dlp --dump-single-json` for a single video.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: String,
    title: Option<String>,
    fulltitle: Option<String>,
    description: Option<String>,
    upload_date: Option<String>,
    timestamp: Option<i64>,
    release_timestamp: Option<i64>,
    uploader: Option<OneOrMany<CreatorInfo>>,
    uploader_id: Option<String>,
    uploader_url: Option<OneOrMany<String>>,
    channel: Option<OneOrMany<CreatorInfo>>,
    channel_id: Option<OneOrMany<String>>,
    channel_url: Option<OneOrMany<String>>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<i64>,
    fps: Option<f64>,
    tbr: Option<f64>,
    abr: Option<f64>,
    vbr: Option<f64>,
}

impl VideoInfo {
    fn into_parts(self) -> Result<(VideoDescriptor, Vec<StreamDescriptor>)> {
        let channel_id = first_string(&self.channel_id)
            .or_else(|| first_creator(&self.channel, CreatorInfo::id))
            .or(self.uploader_id.as_deref())
            .unwrap_or_default()
            .to_string();
        let channel_title = first_creator(&self.channel, CreatorInfo::name)
            .or_else(|| first_creator(&self.uploader, CreatorInfo::name))
            .unwrap_or_default()
            .to_string();
        let channel_url = first_string(&self.channel_url)
            .or_else(|| first_creator(&self.channel, CreatorInfo::url))
            .or_else(|| first_string(&self.uploader_url))
            .map(str::to_string)
            .or_else(|| {
                (!channel_id.is_empty())
                    .then(|| format!("https://www.youtube.com/channel/{channel_id}"))
            })
            .unwrap_or_default();

        let Some(title) = self.title.or(self.fulltitle) else {
            bail!("video {} has no title", self.id);
        };
        let uploaded_at = self
            .timestamp
            .or(self.release_timestamp)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .or_else(|| self.upload_date.as_deref().and_then(upload_date_to_utc));
        let url = self
            .webpage_url
            .unwrap_or_else(|| video_url(&self.id));

        let streams = self.formats.iter().filter_map(stream_descriptor).collect();
        let video = VideoDescriptor {
            id: self.id,
            title,
            description: self.description.unwrap_or_default(),
            channel: ChannelInfo {
                id: channel_id,
                title: channel_title,
                url: channel_url,
            },
            duration: self
                .duration
                .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
                .map(|seconds| seconds.round() as u64),
            url,
            uploaded_at,
        };
        Ok((video, streams))
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(codec) if !codec.is_empty() && codec != "none")
}

/// Keeps only audio-only and video-only formats; muxed and storyboard
/// formats are not candidates for merging.
fn stream_descriptor(format: &FormatInfo) -> Option<StreamDescriptor> {
    let format_id = format.format_id.as_deref()?.trim();
    if format_id.is_empty() {
        return None;
    }
    let container = Container::from_extension(format.ext.as_deref()?);
    let has_video = codec_present(format.vcodec.as_deref());
    let has_audio = codec_present(format.acodec.as_deref());

    let (role, kbps) = match (has_video, has_audio) {
        (false, true) => (StreamRole::AudioOnly, format.abr.or(format.tbr)),
        (true, false) => {
            let height = u32::try_from(format.height?).ok().filter(|h| *h > 0)?;
            let label = QualityLabel::from_height(height, format.fps);
            let quality = VideoQuality {
                label: label.as_str().to_string(),
                max_height: height,
            };
            (StreamRole::VideoOnly(quality), format.vbr.or(format.tbr))
        }
        _ => return None,
    };

    let bitrate = kbps
        .filter(|kbps| kbps.is_finite() && *kbps > 0.0)
        .map(|kbps| (kbps * 1000.0).round() as u64)
        .unwrap_or(0);

    Some(StreamDescriptor {
        format_id: format_id.to_string(),
        container,
        bitrate,
        role,
    })
}

/// Converts yt-dlp's `YYYYMMDD` upload date to midnight UTC.
fn upload_date_to_utc(value: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

#[derive(Debug, Deserialize)]
struct PlaylistInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    webpage_url: Option<String>,
    #[serde(default)]
    entries: Vec<Option<PlaylistItem>>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    id: Option<String>,
    title: Option<String>,
}

impl PlaylistInfo {
    /// `null` entries are deleted or private videos; they still occupy a
    /// playlist position.
    fn into_batch(self) -> PlaylistBatch {
        let consumed = self.entries.len();
        let entries = self
            .entries
            .into_iter()
            .flatten()
            .filter_map(|item| {
                let id = item.id?.trim().to_string();
                (!id.is_empty()).then_some(PlaylistEntry {
                    id,
                    title: item.title,
                })
            })
            .collect();
        PlaylistBatch { entries, consumed }
    }
}
