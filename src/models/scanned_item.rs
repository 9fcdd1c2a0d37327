use std::path::PathBuf;

use super::book_folder::BookFolder;
use super::metadata::{Chapter, Metadata};

/// A single parsed audio file within a scan, paired with its source path.
#[derive(Debug, Clone)]
pub struct AudioEntry {
    pub path: PathBuf,
    pub metadata: Metadata,
}

/// The output of scanning one book folder.
#[derive(Debug, Clone)]
pub struct ScannedItem {
    pub path: BookFolder,
    pub audio_files: Vec<AudioEntry>,
    pub image_files: Vec<PathBuf>,
    pub metadata_files: Vec<PathBuf>,
}

impl ScannedItem {
    pub fn empty(path: BookFolder) -> Self {
        Self {
            path,
            audio_files: Vec::new(),
            image_files: Vec::new(),
            metadata_files: Vec::new(),
        }
    }

    /// Total duration across all audio files.
    pub fn total_duration(&self) -> std::time::Duration {
        self.audio_files.iter().map(|a| a.metadata.duration).sum()
    }

    /// Total file size across all audio files.
    pub fn total_size(&self) -> u64 {
        self.audio_files.iter().map(|a| a.metadata.file_size).sum()
    }

    /// Aggregate, first-file-wins textual metadata plus summed
    /// duration/size and synthesized per-file chapters with cumulative
    /// start times.
    pub fn aggregate(&self) -> Option<AggregateMetadata> {
        let first = self.audio_files.first()?.metadata.clone();
        let mut chapters = Vec::with_capacity(self.audio_files.len());
        let mut cursor = std::time::Duration::ZERO;
        let mut warnings = Vec::new();

        for (i, entry) in self.audio_files.iter().enumerate() {
            let title = chapter_title_for(entry, i);
            let start = cursor;
            let end = start + entry.metadata.duration;
            chapters.push(Chapter {
                index: i as u32 + 1,
                title,
                start_time: start,
                end_time: end,
            });
            cursor = end;
            warnings.extend(entry.metadata.warnings.iter().cloned());
        }

        for field in ["album", "artist", "genre"] {
            if disagrees(&self.audio_files, field) {
                warnings.push(format!("{field} disagrees across files in this folder"));
            }
        }

        Some(AggregateMetadata {
            title: first.title,
            artist: first.artist,
            album: first.album,
            year: first.year,
            genre: first.genre,
            narrator: first.narrator,
            publisher: first.publisher,
            series: first.series,
            series_part: first.series_part,
            isbn: first.isbn,
            asin: first.asin,
            duration: self.total_duration(),
            file_size: self.total_size(),
            chapters,
            warnings,
        })
    }
}

fn chapter_title_for(entry: &AudioEntry, index: usize) -> String {
    super::super::scanner::chapter_titles::extract_title(&entry.path)
        .or_else(|| entry.metadata.title.clone())
        .unwrap_or_else(|| format!("Chapter {}", index + 1))
}

fn disagrees(entries: &[AudioEntry], field: &str) -> bool {
    let value_of = |m: &Metadata| -> Option<&str> {
        match field {
            "album" => m.album.as_deref(),
            "artist" => m.artist.as_deref(),
            "genre" => m.genre.as_deref(),
            _ => None,
        }
    };
    let mut seen = None;
    for entry in entries {
        let v = value_of(&entry.metadata);
        if v.is_none() {
            continue;
        }
        match &seen {
            None => seen = Some(v),
            Some(s) if *s != v => return true,
            _ => {}
        }
    }
    false
}

/// Aggregated, book-level metadata derived from a [`ScannedItem`].
#[derive(Debug, Clone, Default)]
pub struct AggregateMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub narrator: Option<String>,
    pub publisher: Option<String>,
    pub series: Option<String>,
    pub series_part: Option<String>,
    pub isbn: Option<String>,
    pub asin: Option<String>,
    pub duration: std::time::Duration,
    pub file_size: u64,
    pub chapters: Vec<Chapter>,
    pub warnings: Vec<String>,
}
