use std::path::PathBuf;
use std::time::Duration;

/// A single chapter within an audio file (or a synthesized one-per-file
/// chapter in a multi-file aggregate).
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub index: u32,
    pub title: String,
    pub start_time: Duration,
    pub end_time: Duration,
}

/// Parsed metadata for one audio file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub path: PathBuf,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub comment: Option<String>,
    pub track_number: Option<u32>,
    pub track_total: Option<u32>,
    pub disc_number: Option<u32>,
    pub disc_total: Option<u32>,
    pub duration: Duration,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub codec: Option<String>,
    pub narrator: Option<String>,
    pub publisher: Option<String>,
    pub series: Option<String>,
    pub series_part: Option<String>,
    pub isbn: Option<String>,
    pub asin: Option<String>,
    pub container_format: Option<String>,
    pub file_size: u64,
    pub chapters: Vec<Chapter>,
    pub warnings: Vec<String>,
}

impl Metadata {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    /// Applies the narrator fallback: composer stands in for narrator when
    /// no dedicated narrator field was present in the container.
    pub fn apply_narrator_fallback(&mut self) {
        if self.narrator.is_none() {
            self.narrator = self.composer.clone();
        }
    }
}
