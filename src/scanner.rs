#![forbid(unsafe_code)]

use std::{collections::HashSet, path::Path, sync::LazyLock};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

/// `... [<id>].mp4`, the suffix written by the video downloader.
static PRESENT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([0-9A-Za-z_-]+)\]\.mp4$").expect("present id pattern is valid")
});

/// Collects the video ids already downloaded into `dir`.
///
/// Only direct children with the exact `.mp4` extension are considered;
/// anything not ending in `[<id>].mp4` is ignored.
pub fn find_present_ids(dir: &Path) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) != Some("mp4") {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some(caps) = PRESENT_ID.captures(name) {
            ids.insert(caps[1].to_owned());
        }
    }

    debug!(dir = %dir.display(), count = ids.len(), "scanned existing downloads");
    Ok(ids)
}
