#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::debug;

use crate::error::ToolError;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_YT_DLP: &str = "yt-dlp";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_FFPROBE: &str = "ffprobe";

const YT_DLP_KEY: &str = "YTDL_YT_DLP";
const FFMPEG_KEY: &str = "YTDL_FFMPEG";
const FFPROBE_KEY: &str = "YTDL_FFPROBE";
const COOKIES_KEY: &str = "YTDL_COOKIES";

/// Locations of the external programs the downloader shells out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub cookies: Option<PathBuf>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            yt_dlp: PathBuf::from(DEFAULT_YT_DLP),
            ffmpeg: PathBuf::from(DEFAULT_FFMPEG),
            ffprobe: PathBuf::from(DEFAULT_FFPROBE),
            cookies: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOverrides {
    pub yt_dlp: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub cookies: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_tool_paths(overrides: ToolOverrides) -> Result<ToolPaths> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_tool_paths_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_tool_paths(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> ToolPaths {
    build_tool_paths_with_overrides(file_vars, env_lookup, ToolOverrides::default())
}

fn build_tool_paths_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ToolOverrides,
) -> ToolPaths {
    let program = |value: Option<PathBuf>, key: &str, default: &str| {
        value
            .filter(|path| !path.as_os_str().is_empty())
            .or_else(|| lookup_value(key, file_vars, &env_lookup).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(default))
    };
    let yt_dlp = program(overrides.yt_dlp, YT_DLP_KEY, DEFAULT_YT_DLP);
    let ffmpeg = program(overrides.ffmpeg, FFMPEG_KEY, DEFAULT_FFMPEG);
    let ffprobe = program(overrides.ffprobe, FFPROBE_KEY, DEFAULT_FFPROBE);
    let cookies = overrides
        .cookies
        .or_else(|| lookup_value(COOKIES_KEY, file_vars, &env_lookup).map(PathBuf::from));
    ToolPaths {
        yt_dlp,
        ffmpeg,
        ffprobe,
        cookies,
    }
}

/// Process environment value for `key`, trimmed; blank counts as unset.
fn env_var_string(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

/// Reads `KEY=value` pairs from a dotenv-style file. A missing file is the
/// same as an empty one.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let vars: HashMap<String, String> = content
        .lines()
        .filter_map(parse_env_line)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    debug!(path = %path.display(), keys = vars.len(), "loaded env file");
    Ok(vars)
}

/// Splits one env file line. Blank lines, `#` comments and lines without a
/// key yield `None`; `export ` and matching outer quotes are stripped.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, unquote(value.trim())))
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote)?.strip_suffix(quote))
        .unwrap_or(value)
}

impl ToolPaths {
    /// Checks the programs every command needs before any work starts.
    /// ffprobe is only needed for the comment read-back and is checked there.
    pub fn ensure_available(&self) -> Result<(), ToolError> {
        ensure_program_available(&self.yt_dlp)?;
        ensure_program_available(&self.ffmpeg)
    }
}

/// Runs `<program> --version` and reports whether it can be started.
pub fn ensure_program_available(program: &Path) -> Result<(), ToolError> {
    let name = program.display().to_string();
    let output = Command::new(program)
        .arg(if is_ffmpeg_family(program) {
            "-version"
        } else {
            "--version"
        })
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| ToolError::Missing {
            program: name.clone(),
            source,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ToolError::failed(name, "version check", output.status, &output.stderr))
    }
}

/// ffmpeg and ffprobe only understand the single-dash `-version`.
fn is_ffmpeg_family(program: &Path) -> bool {
    program
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.starts_with("ff"))
}
