#![forbid(unsafe_code)]

//! `ytdl`: download a single video, or resync a playlist into a directory.
//!
//! Tool locations come from `--env-file` (default `.env`) and the
//! environment; see `ytdl_tools::config`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use ytdl_tools::config::{ToolOverrides, resolve_tool_paths};
use ytdl_tools::metadata::pretty_comment;
use ytdl_tools::playlist::{PlaylistRun, RunOutcome, download_playlist};
use ytdl_tools::quality::QualityCeiling;
use ytdl_tools::tags::{FfmpegTagger, TagWriter};
use ytdl_tools::video::{ConversionPreset, DownloadTask, download_video};
use ytdl_tools::ytdlp::YtDlpClient;

#[derive(Debug, Parser)]
#[command(
    name = "ytdl",
    version,
    about = "Download YouTube videos and playlists as tagged mp4 files"
)]
struct Cli {
    /// Env file with tool locations (YTDL_YT_DLP, YTDL_FFMPEG, ...).
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download one video.
    #[command(visible_alias = "v")]
    Video {
        /// Video URL or id.
        url: String,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Download the videos of a playlist that are not in the output directory yet.
    #[command(visible_alias = "l")]
    List {
        /// Playlist URL or id.
        url: String,
        #[command(flatten)]
        target: TargetArgs,
        /// Stop after this many successful downloads; negative means no limit.
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        limit: i64,
        /// Download videos again even if they are already present.
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Existing directory to write into.
    #[arg(short, long, value_name = "DIR", value_parser = existing_dir)]
    output: PathBuf,
    /// Highest video resolution to download.
    #[arg(short, long, value_enum, default_value_t = QualityCeiling::P720)]
    quality: QualityCeiling,
    /// ffmpeg preset used while muxing.
    #[arg(
        short = 'p',
        long = "conversion-preset",
        value_enum,
        ignore_case = true,
        default_value_t = ConversionPreset::Medium
    )]
    preset: ConversionPreset,
}

fn existing_dir(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_dir() {
        Ok(path)
    } else if path.exists() {
        Err(format!("{value} is not a directory"))
    } else {
        Err(format!("directory {value} does not exist"))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let tools = resolve_tool_paths(ToolOverrides {
        env_path: cli.env_file,
        ..ToolOverrides::default()
    })?;
    tools.ensure_available()?;

    let tagger = FfmpegTagger::new(&tools.ffmpeg, &tools.ffprobe);
    let client = YtDlpClient::new(tools);

    match cli.command {
        Command::Video { url, target } => {
            let task = DownloadTask {
                video: url,
                output_dir: target.output,
                quality: target.quality,
                preset: target.preset,
            };
            let path = download_video(&client, &tagger, &task).await?;
            match tagger.read_comment(&path).await {
                Ok(Some(comment)) => println!("{}", pretty_comment(&comment)),
                Ok(None) => warn!(path = %path.display(), "downloaded file carries no comment tag"),
                Err(err) => warn!(error = %format!("{err:#}"), "could not read tags back"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::List {
            url,
            target,
            limit,
            overwrite,
        } => {
            let run = PlaylistRun {
                playlist: url,
                output_dir: target.output,
                limit: usize::try_from(limit).ok(),
                skip_existing: !overwrite,
                quality: target.quality,
                preset: target.preset,
            };
            match download_playlist(&client, &tagger, &run).await? {
                RunOutcome::PlaylistNotFound => Ok(ExitCode::FAILURE),
                RunOutcome::Finished(summary) => {
                    println!();
                    println!(
                        "Downloaded {}, skipped {}, failed {}{}",
                        summary.downloaded,
                        summary.skipped,
                        summary.failed,
                        if summary.limit_reached {
                            " (limit reached)"
                        } else {
                            ""
                        }
                    );
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
    }
}
