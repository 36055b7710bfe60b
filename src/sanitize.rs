#![forbid(unsafe_code)]

//! Turns human-written titles into something that can live in a file name.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::quality::{Container, QualityLabel};

const GLYPH_CLASS: &str = r"\p{Extended_Pictographic}\p{Co}\x{1F3FB}-\x{1F3FF}\x{FE0E}\x{FE0F}\x{200D}\x{20E3}\x{1F1E6}-\x{1F1FF}\x{E0020}-\x{E007F}";
const MARK_CLASS: &str = r"\x{00A9}\x{00AE}\x{2122}";

/// Runs of emoji, pictographs, their joiners and modifiers, and private-use
/// glyphs, together with the whitespace around them.
static DECORATIVE_GLYPHS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\s*[{GLYPH_CLASS}][{GLYPH_CLASS}\s]*"))
        .expect("decorative glyph pattern is valid")
});

/// Copyright, registered and trademark marks.
static LEGAL_MARKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\s*[{MARK_CLASS}][{MARK_CLASS}\s]*")).expect("mark pattern is valid")
});

static SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*/").expect("slash pattern is valid"));

const INVALID_FILE_NAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Cleans a title or channel name before it is put into a file name.
///
/// Decorative glyphs and legal marks are dropped, `/` becomes `-` and the
/// result is trimmed. A dropped run that touched whitespace leaves a single
/// space behind, so words never get glued together. Applying it twice gives
/// the same string as applying it once.
pub fn fix_title(title: &str) -> String {
    let without_glyphs = DECORATIVE_GLYPHS.replace_all(title, collapse_run);
    let dashed = SLASH.replace_all(&without_glyphs, "-");
    let without_marks = LEGAL_MARKS.replace_all(&dashed, collapse_run);
    without_marks.trim().to_string()
}

fn collapse_run(caps: &Captures<'_>) -> &'static str {
    let run = &caps[0];
    if run.starts_with(char::is_whitespace) || run.ends_with(char::is_whitespace) {
        " "
    } else {
        ""
    }
}

/// Replaces characters that no common filesystem accepts in a path segment.
pub fn escape_file_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| match c {
            c if INVALID_FILE_NAME_CHARS.contains(&c) => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// `{channel} - {title} ({quality}) [{id}].{ext}`, the name the existing-id
/// scanner parses back.
pub fn output_file_name(
    channel_title: &str,
    video_title: &str,
    quality: &QualityLabel,
    video_id: &str,
    container: &Container,
) -> String {
    let file_name = format!(
        "{} - {} ({}) [{}].{}",
        fix_title(channel_title),
        fix_title(video_title),
        quality,
        video_id,
        container.name()
    );
    escape_file_name(&file_name)
}
