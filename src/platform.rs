#![forbid(unsafe_code)]

//! Capabilities the downloader needs from the video platform. The production
//! implementation lives in [`crate::ytdlp`]; tests substitute in-memory fakes.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::metadata::VideoDescriptor;
use crate::quality::{Container, StreamDescriptor};
use crate::video::ConversionPreset;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistDescriptor {
    pub id: String,
    pub title: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: Option<String>,
}

/// One page of a playlist listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistBatch {
    /// Listed videos, in playlist order. Unavailable positions are left out.
    pub entries: Vec<PlaylistEntry>,
    /// Playlist positions the page covered, including the ones left out of
    /// `entries`. Zero marks the end of the playlist.
    pub consumed: usize,
}

/// Where and how to write a muxed download.
#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest<'a> {
    pub video: &'a VideoDescriptor,
    pub output: &'a Path,
    pub container: &'a Container,
    pub preset: ConversionPreset,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Resolves a video URL or bare id.
    async fn resolve_video(&self, url: &str) -> Result<VideoDescriptor>;

    async fn stream_manifest(&self, video: &VideoDescriptor) -> Result<Vec<StreamDescriptor>>;

    /// Resolves a playlist URL or bare id.
    async fn resolve_playlist(&self, url: &str) -> Result<PlaylistDescriptor>;

    /// Returns the page starting at playlist position `offset` (zero based).
    async fn playlist_batch(
        &self,
        playlist: &PlaylistDescriptor,
        offset: usize,
    ) -> Result<PlaylistBatch>;

    /// Downloads `streams` and muxes them into `request.output`.
    async fn download(
        &self,
        streams: &[&StreamDescriptor],
        request: &DownloadRequest<'_>,
    ) -> Result<()>;
}
