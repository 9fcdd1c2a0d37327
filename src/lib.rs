//! Library ingest pipeline for a self-hosted audiobook server.
//!
//! Three stages compose the pipeline: a [`watcher`] that turns OS filesystem
//! activity into a canonical event stream, a [`processor`] that classifies
//! and serializes per-folder work, and a [`scanner`] that parses audio
//! container metadata (delegating to [`parsers`]) and extracts cover art
//! (via [`image`]). The [`store`] module defines the narrow interfaces this
//! crate consumes for persistence; no implementation of them lives here.

pub mod cancel;
pub mod config;
pub mod error;
pub mod image;
pub mod models;
pub mod parsers;
pub mod processor;
pub mod scanner;
pub mod store;
pub mod watcher;

pub use cancel::CancellationToken;
pub use error::{ParseError, ScanError, StoreError, WatchError};
pub use models::{Book, BookFolder, Chapter, Event, EventType, FileType, Metadata, ScannedItem};
pub use processor::Processor;
