//! Recognized configuration options for the ingest pipeline.
//!
//! These are plain value structs a caller builds or deserializes from
//! wherever application settings live; this crate does not discover,
//! read, or watch a settings file itself.

use serde::{Deserialize, Serialize};

fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".DS_Store".to_string(),
        "*.tmp".to_string(),
        "*.temp".to_string(),
        "Thumbs.db".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_settle_delay_ms() -> u64 {
    100
}

/// Options accepted by both watcher backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatcherOptions {
    /// Glob patterns matched against path components; matches are dropped.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Drop any path with a component beginning with `.` (excluding `.`/`..`).
    #[serde(default = "default_true")]
    pub ignore_hidden: bool,

    /// Fallback-backend settle interval, in milliseconds.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            ignore_patterns: default_ignore_patterns(),
            ignore_hidden: true,
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// Options accepted by the folder scanner's worker pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScannerOptions {
    /// Worker count; `0` selects a CPU-count default.
    #[serde(default)]
    pub workers: usize,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self { workers: 0 }
    }
}

impl ScannerOptions {
    /// Resolves `workers = 0` to the available parallelism.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        }
    }
}

/// Top-level ingest pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    #[serde(default)]
    pub watcher: WatcherOptions,

    #[serde(default)]
    pub scanner: ScannerOptions,

    /// When true, newly created books are assigned to a moderation inbox
    /// collection as a best-effort side effect of creation.
    #[serde(default)]
    pub inbox_enabled: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            watcher: WatcherOptions::default(),
            scanner: ScannerOptions::default(),
            inbox_enabled: false,
        }
    }
}
