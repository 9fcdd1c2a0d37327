use std::path::PathBuf;
use std::time::SystemTime;

/// The kind of change a watcher event reports.
///
/// Both shipped backends only ever construct [`EventType::Added`] —
/// distinguishing Added from Modified is left to the consumer, per the
/// close-after-write semantics of the primary backend and the settle-timer
/// semantics of the fallback. `Modified` and `Moved` remain constructible
/// for future backends and for event-replay tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Modified,
    Removed,
    Moved,
}

/// A canonical filesystem change record produced by a watcher backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventType,
    pub path: PathBuf,
    /// Present only for `Moved`.
    pub old_path: Option<PathBuf>,
    /// Zero when the platform cannot supply a stable file-identity token.
    pub inode: Option<u64>,
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
}

impl Event {
    pub fn added(path: PathBuf) -> Self {
        Self {
            kind: EventType::Added,
            path,
            old_path: None,
            inode: None,
            size: None,
            mtime: None,
        }
    }

    pub fn removed(path: PathBuf) -> Self {
        Self {
            kind: EventType::Removed,
            path,
            old_path: None,
            inode: None,
            size: None,
            mtime: None,
        }
    }

    pub fn moved(old_path: PathBuf, path: PathBuf) -> Self {
        Self {
            kind: EventType::Moved,
            path,
            old_path: Some(old_path),
            inode: None,
            size: None,
            mtime: None,
        }
    }

    pub fn with_stat(mut self, size: u64, mtime: SystemTime) -> Self {
        self.size = Some(size);
        self.mtime = Some(mtime);
        self
    }

    pub fn with_inode(mut self, inode: u64) -> Self {
        self.inode = Some(inode);
        self
    }
}

/// Syntactic classification of a path by extension.
///
/// Purely a function of the lower-cased extension; removal events with
/// [`FileType::Ignored`] are not dropped by the processor because a whole
/// book-folder removal arrives as an extensionless path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Audio,
    Cover,
    Metadata,
    Ignored,
}

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "m4b", "flac", "opus", "ogg", "aac", "wma", "wav"];
const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const METADATA_EXTENSIONS: &[&str] = &["nfo", "txt", "json"];

impl FileType {
    /// Classifies a path by its lower-cased extension.
    pub fn classify(path: &std::path::Path) -> Self {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_ascii_lowercase(),
            None => return FileType::Ignored,
        };
        if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            FileType::Audio
        } else if COVER_EXTENSIONS.contains(&ext.as_str()) {
            FileType::Cover
        } else if METADATA_EXTENSIONS.contains(&ext.as_str()) {
            FileType::Metadata
        } else {
            FileType::Ignored
        }
    }
}
