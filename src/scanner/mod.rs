//! Folder scanner: walks one book folder (disc subfolders flattened),
//! classifies entries, and parses audio files in parallel.

pub mod chapter_titles;
pub mod natural_sort;

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;

use crate::config::ScannerOptions;
use crate::error::ScanError;
use crate::models::{AudioEntry, BookFolder, FileType, ScannedItem};
use crate::parsers;

lazy_static! {
    static ref DISC_PATTERN: Regex = Regex::new(r"(?i)^(cd|disc|disk)\s*0*\d+$").unwrap();
}

pub struct FolderScanner {
    options: ScannerOptions,
}

impl FolderScanner {
    pub fn new(options: ScannerOptions) -> Self {
        Self { options }
    }

    /// Walks `folder` non-recursively, flattening any immediate
    /// subdirectory whose name matches the disc pattern, classifies every
    /// entry, and parses audio files in parallel.
    pub fn scan(&self, folder: &BookFolder) -> Result<ScannedItem, ScanError> {
        let root = folder.as_path();
        let entries = self.collect_entries(root)?;

        let mut image_files = Vec::new();
        let mut metadata_files = Vec::new();
        let mut audio_paths = Vec::new();

        for path in entries {
            match FileType::classify(&path) {
                FileType::Audio => audio_paths.push(path),
                FileType::Cover => image_files.push(path),
                FileType::Metadata => metadata_files.push(path),
                FileType::Ignored => {}
            }
        }

        // Deduplicate by path (can occur if a disc folder is symlinked
        // into itself or listed twice by a racing directory walk).
        audio_paths.sort();
        audio_paths.dedup();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.resolved_workers())
            .build()
            .map_err(|source| ScanError::Io {
                path: root.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, source),
            })?;

        let mut audio_files: Vec<AudioEntry> = pool.install(|| {
            audio_paths
                .par_iter()
                .filter_map(|path| parse_one(path))
                .collect()
        });

        audio_files.sort_by(|a, b| natural_sort::natural_cmp_paths(&a.path, &b.path));

        Ok(ScannedItem {
            path: folder.clone(),
            audio_files,
            image_files,
            metadata_files,
        })
    }

    fn collect_entries(&self, root: &Path) -> Result<Vec<PathBuf>, ScanError> {
        let mut out = Vec::new();
        let direct = std::fs::read_dir(root).map_err(|source| ScanError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        for entry in direct {
            let entry = entry.map_err(|source| ScanError::Io {
                path: root.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                let is_disc = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| DISC_PATTERN.is_match(n))
                    .unwrap_or(false);
                if is_disc {
                    if let Ok(children) = std::fs::read_dir(&path) {
                        for child in children.flatten() {
                            out.push(child.path());
                        }
                    }
                }
                // Non-disc subdirectories belong to a different book and
                // are not part of this folder's scan.
            } else {
                out.push(path);
            }
        }

        Ok(out)
    }
}

fn parse_one(path: &Path) -> Option<AudioEntry> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(source) => {
            tracing::warn!(path = %path.display(), error = %source, "failed to read audio file, dropping from scan");
            return None;
        }
    };

    match parsers::parse_file(path, &bytes) {
        Ok(metadata) => Some(AudioEntry {
            path: path.to_path_buf(),
            metadata,
        }),
        Err(source) => {
            tracing::warn!(path = %path.display(), error = %source, "container parse failed, dropping from scan");
            None
        }
    }
}
