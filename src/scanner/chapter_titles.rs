use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NUMBER_DASH_TITLE: Regex = Regex::new(r"^\d+\s*-\s*(?P<title>.+)$").unwrap();
    static ref CHAPTER_LABEL: Regex = Regex::new(r"(?i)^(?P<title>chapter\s*\d+.*)$").unwrap();
    static ref TRACK_LABEL: Regex = Regex::new(r"(?i)^(?P<title>track\s*\d+.*)$").unwrap();
    static ref PART_LABEL: Regex = Regex::new(r"(?i)^(?P<title>part\s*\d+.*)$").unwrap();
    static ref NUMBER_SPACE_TITLE: Regex = Regex::new(r"^\d+\s+(?P<title>.+)$").unwrap();
    static ref BARE_NUMBER: Regex = Regex::new(r"^\d+$").unwrap();
}

/// Extracts a chapter title from a filename, trying each recognized
/// pattern in order: `"NN - Title.ext"`, `"Chapter NN..."`,
/// `"Track NN..."`, `"Part NN..."`, `"NN Title.ext"`, then `"NN.ext"`
/// (no title available). Returns `None` when nothing matches, letting the
/// caller fall back to the file's own tagged title.
pub fn extract_title(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?.trim();

    if let Some(caps) = NUMBER_DASH_TITLE.captures(stem) {
        return clean(&caps["title"]);
    }
    if let Some(caps) = CHAPTER_LABEL.captures(stem) {
        return clean(&caps["title"]);
    }
    if let Some(caps) = TRACK_LABEL.captures(stem) {
        return clean(&caps["title"]);
    }
    if let Some(caps) = PART_LABEL.captures(stem) {
        return clean(&caps["title"]);
    }
    if let Some(caps) = NUMBER_SPACE_TITLE.captures(stem) {
        return clean(&caps["title"]);
    }
    if BARE_NUMBER.is_match(stem) {
        return None;
    }

    None
}

fn clean(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
