//! Typed error kinds shared across the pipeline.
//!
//! Each component (watcher, processor, scanner, parsers) produces one of
//! these kinds at the point an operation fails; callers crossing a module
//! boundary wrap them with `anyhow::Context` rather than inventing new error
//! types per call site.

use std::path::PathBuf;

use thiserror::Error;

/// A structured container-parse error.
///
/// Parsers never panic on truncated or malformed input; every bounds check
/// that fails becomes one of these variants instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("out of bounds read at offset {offset} (wanted {length} bytes, size is {size}) while {context}")]
    OutOfBounds {
        offset: usize,
        length: usize,
        size: usize,
        context: String,
    },

    #[error("unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    #[error("corrupted data at offset {offset}: {reason}")]
    Corrupted { offset: usize, reason: String },
}

impl ParseError {
    pub fn out_of_bounds(offset: usize, length: usize, size: usize, context: impl Into<String>) -> Self {
        ParseError::OutOfBounds {
            offset,
            length,
            size,
            context: context.into(),
        }
    }

    pub fn corrupted(offset: usize, reason: impl Into<String>) -> Self {
        ParseError::Corrupted {
            offset,
            reason: reason.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        ParseError::UnsupportedFormat {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Failed to add a watch on a subdirectory. Non-fatal: the walk
    /// continues and the rest of the tree is still covered.
    #[error("failed to watch {path}: {source}")]
    WatchAdd {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The raw event channel errored. Fatal to the backend that raised it.
    #[error("watcher read loop failed: {source}")]
    WatchRead {
        #[source]
        source: notify::Error,
    },
}

/// Errors surfaced by the folder scanner.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read folder {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by a `BookStore` implementation, as seen by the processor.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("book store operation failed: {0}")]
    Backend(#[source] anyhow::Error),
}
