#![forbid(unsafe_code)]

//! Playlist resync: download every entry not already present in the output
//! directory, up to an optional limit, tolerating per-video failures.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::platform::PlatformClient;
use crate::quality::QualityCeiling;
use crate::scanner::find_present_ids;
use crate::tags::TagWriter;
use crate::video::{ConversionPreset, DownloadTask, download_video};

#[derive(Debug, Clone)]
pub struct PlaylistRun {
    /// Playlist URL or bare id.
    pub playlist: String,
    pub output_dir: PathBuf,
    /// Maximum number of successful downloads; `None` means unlimited.
    pub limit: Option<usize>,
    /// Skip ids already present in `output_dir`.
    pub skip_existing: bool,
    pub quality: QualityCeiling,
    pub preset: ConversionPreset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The run stopped early because `limit` downloads succeeded.
    pub limit_reached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(RunSummary),
    PlaylistNotFound,
}

impl RunSummary {
    fn limit_hit(&self, limit: Option<usize>) -> bool {
        limit.is_some_and(|limit| self.downloaded >= limit)
    }
}

/// Walks the playlist batch by batch, in playlist order.
///
/// Only an unresolvable playlist, an unreadable output directory, or a failed
/// batch listing end the run early; a failing video is reported on stderr
/// and the next one is tried.
pub async fn download_playlist(
    client: &dyn PlatformClient,
    tagger: &dyn TagWriter,
    run: &PlaylistRun,
) -> Result<RunOutcome> {
    // Computed once; files written during this run are not rescanned.
    let present: HashSet<String> = if run.skip_existing {
        find_present_ids(&run.output_dir)?
    } else {
        HashSet::new()
    };

    let playlist = match client.resolve_playlist(&run.playlist).await {
        Ok(playlist) => playlist,
        Err(err) => {
            debug!(playlist = %run.playlist, error = %format!("{err:#}"), "playlist lookup failed");
            eprintln!("Playlist-URL {} not found!", run.playlist);
            return Ok(RunOutcome::PlaylistNotFound);
        }
    };
    info!(
        id = %playlist.id,
        title = playlist.title.as_deref().unwrap_or_default(),
        present = present.len(),
        "syncing playlist"
    );

    let mut summary = RunSummary::default();
    let mut offset = 0;
    'batches: loop {
        if summary.limit_hit(run.limit) {
            summary.limit_reached = true;
            break;
        }
        let batch = client
            .playlist_batch(&playlist, offset)
            .await
            .with_context(|| format!("listing playlist {} from item {}", playlist.id, offset + 1))?;
        if batch.consumed == 0 {
            break;
        }
        offset += batch.consumed;

        for entry in batch.entries {
            if summary.limit_hit(run.limit) {
                summary.limit_reached = true;
                break 'batches;
            }
            if present.contains(&entry.id) {
                summary.skipped += 1;
                continue;
            }

            let task = DownloadTask {
                video: entry.id.clone(),
                output_dir: run.output_dir.clone(),
                quality: run.quality,
                preset: run.preset,
            };
            match download_video(client, tagger, &task).await {
                Ok(_) => summary.downloaded += 1,
                Err(err) => {
                    summary.failed += 1;
                    eprintln!("=> {} - {err:#} ... Failed", entry.id);
                }
            }
        }
    }

    debug!(?summary, "playlist run finished");
    Ok(RunOutcome::Finished(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, RecordingTagger};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn run(dir: &Path, limit: Option<usize>, skip_existing: bool) -> PlaylistRun {
        PlaylistRun {
            playlist: "PL1".into(),
            output_dir: dir.to_path_buf(),
            limit,
            skip_existing,
            quality: QualityCeiling::P720,
            preset: ConversionPreset::Medium,
        }
    }

    fn five_videos() -> FakePlatform {
        FakePlatform::new().with_playlist("PL1", &["v1", "v2", "v3", "v4", "v5"])
    }

    fn finished(outcome: RunOutcome) -> RunSummary {
        match outcome {
            RunOutcome::Finished(summary) => summary,
            RunOutcome::PlaylistNotFound => panic!("playlist should resolve"),
        }
    }

    #[tokio::test]
    async fn downloads_everything_in_order_without_limit() -> Result<()> {
        let dir = tempdir()?;
        let platform = five_videos();
        let tagger = RecordingTagger::default();

        let summary = finished(download_playlist(&platform, &tagger, &run(dir.path(), None, true)).await?);

        assert_eq!(platform.downloaded_ids(), ["v1", "v2", "v3", "v4", "v5"]);
        assert_eq!(platform.batch_offsets(), [0, 2, 4, 5]);
        assert_eq!(
            summary,
            RunSummary {
                downloaded: 5,
                skipped: 0,
                failed: 0,
                limit_reached: false,
            }
        );
        assert_eq!(tagger.written().len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_positions_keep_paging_in_step() -> Result<()> {
        let dir = tempdir()?;
        let platform = FakePlatform::default().with_playlist_slots(
            "PL1",
            &[Some("v1"), None, None, None, Some("v5")],
        );
        let tagger = RecordingTagger::default();

        let summary = finished(download_playlist(&platform, &tagger, &run(dir.path(), None, true)).await?);

        assert_eq!(platform.downloaded_ids(), ["v1", "v5"]);
        // The second page holds only unavailable videos and must not end the run.
        assert_eq!(platform.batch_offsets(), [0, 2, 4, 5]);
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn limit_stops_run_before_next_item() -> Result<()> {
        let dir = tempdir()?;
        let platform = five_videos();
        let tagger = RecordingTagger::default();

        let summary =
            finished(download_playlist(&platform, &tagger, &run(dir.path(), Some(2), true)).await?);

        assert_eq!(platform.downloaded_ids(), ["v1", "v2"]);
        assert_eq!(platform.resolved(), ["v1", "v2"]);
        assert!(summary.limit_reached);
        assert_eq!(summary.downloaded, 2);
        // The second page is never requested.
        assert_eq!(platform.batch_offsets(), [0]);
        Ok(())
    }

    #[tokio::test]
    async fn limit_stops_mid_batch() -> Result<()> {
        let dir = tempdir()?;
        let platform = five_videos();
        let tagger = RecordingTagger::default();

        let summary =
            finished(download_playlist(&platform, &tagger, &run(dir.path(), Some(3), true)).await?);

        assert_eq!(platform.downloaded_ids(), ["v1", "v2", "v3"]);
        assert_eq!(platform.resolved(), ["v1", "v2", "v3"]);
        assert!(summary.limit_reached);
        Ok(())
    }

    #[tokio::test]
    async fn zero_limit_downloads_nothing() -> Result<()> {
        let dir = tempdir()?;
        let platform = five_videos();
        let tagger = RecordingTagger::default();

        let summary =
            finished(download_playlist(&platform, &tagger, &run(dir.path(), Some(0), true)).await?);

        assert!(platform.resolved().is_empty());
        assert!(platform.batch_offsets().is_empty());
        assert_eq!(summary.downloaded, 0);
        assert!(summary.limit_reached);
        Ok(())
    }

    #[tokio::test]
    async fn skips_ids_already_on_disk() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("Chan - Title (720p) [abc123].mp4"), b"")?;
        let platform = FakePlatform::new().with_playlist("PL1", &["abc123", "def456"]);
        let tagger = RecordingTagger::default();

        let summary = finished(download_playlist(&platform, &tagger, &run(dir.path(), None, true)).await?);

        assert_eq!(platform.downloaded_ids(), ["def456"]);
        assert_eq!(platform.resolved(), ["def456"]);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.downloaded, 1);
        Ok(())
    }

    #[tokio::test]
    async fn skipped_items_do_not_count_towards_limit() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("Chan - Video v1 (720p) [v1].mp4"), b"")?;
        fs::write(dir.path().join("Chan - Video v2 (720p) [v2].mp4"), b"")?;
        let platform = five_videos();
        let tagger = RecordingTagger::default();

        let summary =
            finished(download_playlist(&platform, &tagger, &run(dir.path(), Some(2), true)).await?);

        assert_eq!(platform.downloaded_ids(), ["v3", "v4"]);
        assert_eq!(summary.skipped, 2);
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_redownloads_present_ids() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("Chan - Title (720p) [abc123].mp4"), b"")?;
        let platform = FakePlatform::new().with_playlist("PL1", &["abc123"]);
        let tagger = RecordingTagger::default();

        let summary = finished(download_playlist(&platform, &tagger, &run(dir.path(), None, false)).await?);

        assert_eq!(platform.downloaded_ids(), ["abc123"]);
        assert_eq!(summary.skipped, 0);
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_counted_and_the_run_continues() -> Result<()> {
        let dir = tempdir()?;
        let platform = five_videos().with_unavailable("v2");
        let tagger = RecordingTagger::default();

        let summary =
            finished(download_playlist(&platform, &tagger, &run(dir.path(), Some(2), true)).await?);

        assert_eq!(platform.downloaded_ids(), ["v1", "v3"]);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.downloaded, 2);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_playlist_is_reported_as_outcome() -> Result<()> {
        let dir = tempdir()?;
        let platform = FakePlatform::new();
        let tagger = RecordingTagger::default();

        let mut missing = run(dir.path(), None, true);
        missing.playlist = "PLmissing".into();
        let outcome = download_playlist(&platform, &tagger, &missing).await?;

        assert_eq!(outcome, RunOutcome::PlaylistNotFound);
        assert!(platform.batch_offsets().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_output_directory_fails_when_skipping() {
        let dir = tempdir().unwrap();
        let platform = five_videos();
        let tagger = RecordingTagger::default();

        let result =
            download_playlist(&platform, &tagger, &run(&dir.path().join("gone"), None, true)).await;
        assert!(result.is_err());
        assert!(platform.resolved().is_empty());
    }
}
