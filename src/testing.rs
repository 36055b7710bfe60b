//! In-memory doubles for the platform and tag capabilities.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::metadata::{ChannelInfo, VideoDescriptor};
use crate::platform::{
    DownloadRequest, PlatformClient, PlaylistBatch, PlaylistDescriptor, PlaylistEntry,
};
use crate::quality::{Container, StreamDescriptor, StreamRole, VideoQuality};
use crate::tags::{MediaTags, TagWriter};
use crate::video::ConversionPreset;

#[derive(Debug, Clone)]
pub struct FakeVideo {
    pub descriptor: VideoDescriptor,
    pub streams: Vec<StreamDescriptor>,
}

fn video_stream(format_id: &str, container: Container, height: u32, bitrate: u64) -> StreamDescriptor {
    StreamDescriptor {
        format_id: format_id.into(),
        container,
        bitrate,
        role: StreamRole::VideoOnly(VideoQuality {
            label: format!("{height}p"),
            max_height: height,
        }),
    }
}

fn audio_stream(format_id: &str, container: Container, bitrate: u64) -> StreamDescriptor {
    StreamDescriptor {
        format_id: format_id.into(),
        container,
        bitrate,
        role: StreamRole::AudioOnly,
    }
}

/// A video by channel "Chan" with mp4 streams from 360p to 1080p and the
/// usual pair of mp4 audio tracks (`140` being the better one).
pub fn sample_video(id: &str, title: &str) -> FakeVideo {
    FakeVideo {
        descriptor: VideoDescriptor {
            id: id.into(),
            title: title.into(),
            description: format!("about {id}"),
            channel: ChannelInfo {
                id: "UCchan".into(),
                title: "Chan".into(),
                url: "https://www.youtube.com/channel/UCchan".into(),
            },
            duration: Some(90),
            url: format!("https://www.youtube.com/watch?v={id}"),
            uploaded_at: None,
        },
        streams: vec![
            audio_stream("139", Container::Mp4, 48_000),
            audio_stream("140", Container::Mp4, 128_000),
            audio_stream("251", Container::WebM, 160_000),
            video_stream("134", Container::Mp4, 360, 300_000),
            video_stream("135", Container::Mp4, 480, 600_000),
            video_stream("136", Container::Mp4, 720, 1_200_000),
            video_stream("137", Container::Mp4, 1080, 2_500_000),
            video_stream("248", Container::WebM, 1080, 2_000_000),
        ],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDownload {
    pub id: String,
    pub formats: Vec<String>,
    pub output: PathBuf,
    pub preset: ConversionPreset,
}

/// Platform with a fixed catalogue. Downloads write an empty file at the
/// requested path.
pub struct FakePlatform {
    videos: HashMap<String, FakeVideo>,
    /// `None` is a position whose video is deleted or private.
    playlists: HashMap<String, Vec<Option<String>>>,
    unavailable: HashSet<String>,
    batch_size: usize,
    resolved: Mutex<Vec<String>>,
    batch_offsets: Mutex<Vec<usize>>,
    downloads: Mutex<Vec<RecordedDownload>>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            videos: HashMap::new(),
            playlists: HashMap::new(),
            unavailable: HashSet::new(),
            batch_size: 2,
            resolved: Mutex::new(Vec::new()),
            batch_offsets: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
        }
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, video: FakeVideo) -> Self {
        self.videos.insert(video.descriptor.id.clone(), video);
        self
    }

    /// Registers a playlist and a sample video for each id.
    pub fn with_playlist(self, id: &str, video_ids: &[&str]) -> Self {
        let slots: Vec<Option<&str>> = video_ids.iter().copied().map(Some).collect();
        self.with_playlist_slots(id, &slots)
    }

    /// Like `with_playlist`, with `None` for unavailable positions.
    pub fn with_playlist_slots(mut self, id: &str, slots: &[Option<&str>]) -> Self {
        for video_id in slots.iter().flatten() {
            let video = sample_video(video_id, &format!("Video {video_id}"));
            self.videos.entry(video_id.to_string()).or_insert(video);
        }
        self.playlists.insert(
            id.to_string(),
            slots.iter().map(|slot| slot.map(str::to_string)).collect(),
        );
        self
    }

    /// Makes `id` fail to resolve, like a removed or private video.
    pub fn with_unavailable(mut self, id: &str) -> Self {
        self.unavailable.insert(id.to_string());
        self
    }

    pub fn resolved(&self) -> Vec<String> {
        self.resolved.lock().clone()
    }

    pub fn batch_offsets(&self) -> Vec<usize> {
        self.batch_offsets.lock().clone()
    }

    pub fn downloads(&self) -> Vec<RecordedDownload> {
        self.downloads.lock().clone()
    }

    pub fn downloaded_ids(&self) -> Vec<String> {
        self.downloads.lock().iter().map(|d| d.id.clone()).collect()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn resolve_video(&self, url: &str) -> Result<VideoDescriptor> {
        self.resolved.lock().push(url.to_string());
        if self.unavailable.contains(url) {
            bail!("Video unavailable");
        }
        self.videos
            .get(url)
            .map(|video| video.descriptor.clone())
            .ok_or_else(|| anyhow!("no such video {url}"))
    }

    async fn stream_manifest(&self, video: &VideoDescriptor) -> Result<Vec<StreamDescriptor>> {
        self.videos
            .get(&video.id)
            .map(|video| video.streams.clone())
            .ok_or_else(|| anyhow!("no manifest for {}", video.id))
    }

    async fn resolve_playlist(&self, url: &str) -> Result<PlaylistDescriptor> {
        if !self.playlists.contains_key(url) {
            bail!("playlist {url} does not exist");
        }
        Ok(PlaylistDescriptor {
            id: url.to_string(),
            title: Some(format!("Playlist {url}")),
            url: url.to_string(),
        })
    }

    async fn playlist_batch(
        &self,
        playlist: &PlaylistDescriptor,
        offset: usize,
    ) -> Result<PlaylistBatch> {
        self.batch_offsets.lock().push(offset);
        let slots = self
            .playlists
            .get(&playlist.id)
            .ok_or_else(|| anyhow!("playlist {} vanished", playlist.id))?;
        let page: Vec<_> = slots.iter().skip(offset).take(self.batch_size).collect();
        Ok(PlaylistBatch {
            consumed: page.len(),
            entries: page
                .into_iter()
                .flatten()
                .map(|id| PlaylistEntry {
                    id: id.clone(),
                    title: None,
                })
                .collect(),
        })
    }

    async fn download(
        &self,
        streams: &[&StreamDescriptor],
        request: &DownloadRequest<'_>,
    ) -> Result<()> {
        std::fs::write(request.output, b"")?;
        self.downloads.lock().push(RecordedDownload {
            id: request.video.id.clone(),
            formats: streams.iter().map(|s| s.format_id.clone()).collect(),
            output: request.output.to_path_buf(),
            preset: request.preset,
        });
        Ok(())
    }
}

/// Remembers every tag write; `failing()` rejects them all.
#[derive(Default)]
pub struct RecordingTagger {
    fail: bool,
    written: Mutex<Vec<(PathBuf, MediaTags)>>,
}

impl RecordingTagger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn written(&self) -> Vec<(PathBuf, MediaTags)> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl TagWriter for RecordingTagger {
    async fn write_tags(&self, path: &Path, tags: &MediaTags) -> Result<()> {
        if self.fail {
            bail!("could not save tags to {}", path.display());
        }
        self.written.lock().push((path.to_path_buf(), tags.clone()));
        Ok(())
    }

    async fn read_comment(&self, path: &Path) -> Result<Option<String>> {
        Ok(self
            .written
            .lock()
            .iter()
            .rev()
            .find(|(written, _)| written == path)
            .map(|(_, tags)| tags.comment.clone()))
    }
}
