//! Event processor: classifies watcher events, resolves book-folder
//! identity, serializes per-folder work under a non-blocking lock, and
//! reconciles scan results against the `BookStore`.

pub mod lock_map;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;
use crate::config::IngestConfig;
use crate::image;
use crate::models::{AggregateMetadata, Book, BookFolder, CoverImage, Event, EventType, FileType, ScannedItem};
use crate::scanner::FolderScanner;
use crate::store::{BookStore, ImageStore};

pub use lock_map::{FolderLockMap, OwnedFolderGuard};

/// Owns the folder-lock map and dispatches watcher events to per-folder
/// handlers. One instance per running pipeline; never a process-wide
/// singleton (its lifetime is tied to whoever holds it).
pub struct Processor {
    store: Arc<dyn BookStore>,
    image_store: Arc<dyn ImageStore>,
    scanner: FolderScanner,
    locks: FolderLockMap,
    config: IngestConfig,
}

impl Processor {
    pub fn new(store: Arc<dyn BookStore>, image_store: Arc<dyn ImageStore>, config: IngestConfig) -> Self {
        Self {
            scanner: FolderScanner::new(config.scanner),
            store,
            image_store,
            config,
            locks: FolderLockMap::new(),
        }
    }

    /// Drains `events` until `cancel` fires or the channel closes,
    /// dispatching each to its folder handler on a short-lived task. Does
    /// not wait for in-flight handlers to finish on cancellation — the
    /// caller drains those separately as part of shutdown.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("processor cancelled, stopping dispatch loop");
                    return;
                }
                received = events.recv() => {
                    match received {
                        Some(event) => {
                            let this = Arc::clone(&self);
                            tokio::spawn(async move { this.dispatch(event).await });
                        }
                        None => {
                            tracing::debug!("event channel closed, stopping dispatch loop");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Classifies, resolves the owning folder, try-locks it, and runs the
    /// matching handler. Drops the event without error if the folder is
    /// already being handled: try-lock only, never queue.
    async fn dispatch(&self, event: Event) {
        let class = FileType::classify(&event.path);
        if class == FileType::Ignored && event.kind != EventType::Removed {
            return;
        }

        let Some(folder) = BookFolder::resolve(&event.path) else {
            tracing::warn!(path = %event.path.display(), "event path has no parent, dropping");
            return;
        };

        let Some(_guard) = self.locks.try_lock(folder.as_path()) else {
            tracing::debug!(folder = %folder, "folder already being handled, dropping event");
            return;
        };

        let result = match (class, event.kind) {
            (FileType::Ignored, _) => self.handle_removed_ignored(&event.path).await,
            (_, EventType::Removed) => self.handle_removed_media(&folder).await,
            (FileType::Audio, _) => self.handle_audio_change(&folder).await,
            (FileType::Cover, _) | (FileType::Metadata, _) => self.handle_rescan_only(&folder).await,
        };

        if let Err(err) = result {
            tracing::error!(folder = %folder, error = %err, "folder handler failed");
        }
    }

    async fn handle_audio_change(&self, folder: &BookFolder) -> anyhow::Result<()> {
        let scan = self
            .scanner
            .scan(folder)
            .with_context(|| format!("scanning folder {folder} for audio change"))?;

        let Some(aggregate) = scan.aggregate() else {
            tracing::warn!(folder = %folder, "audio event but scan produced no audio files, skipping");
            return Ok(());
        };

        self.resolve_contributor_and_series(&aggregate).await;

        let existing = self
            .store
            .get_book_by_path(folder.as_path())
            .await
            .context("looking up existing book")?;

        match existing {
            None => {
                let id = book_id_for(folder);
                let title = aggregate.title.clone().unwrap_or_else(|| default_title(folder));
                let mut book = Book::new(id, folder.as_path().to_path_buf(), title);

                self.store.create_book(book.clone()).await.context("creating book")?;
                self.extract_and_apply_cover(&mut book, &scan).await;

                if let Err(err) = self.store.broadcast_book_created(&book).await {
                    tracing::warn!(book = %book.id, error = %err, "broadcast_book_created failed, book still persisted");
                }

                self.assign_to_inbox(&book).await;
            }
            Some(mut book) => {
                if let Some(title) = aggregate.title.clone() {
                    book.title = title;
                }
                self.store.update_book(book.clone()).await.context("updating book")?;
                self.extract_and_apply_cover(&mut book, &scan).await;
            }
        }

        Ok(())
    }

    /// Resolves the aggregate's author and series names into the store's
    /// contributor/series records. Best-effort and non-fatal: a lookup
    /// failure is logged and does not block the book from being
    /// created or updated, since `Book` itself only tracks identity and
    /// cover fields, not contributor/series ids.
    async fn resolve_contributor_and_series(&self, aggregate: &AggregateMetadata) {
        if let Some(artist) = aggregate.artist.as_deref() {
            if let Err(err) = self.store.get_or_create_contributor_by_name(artist).await {
                tracing::warn!(artist, error = %err, "failed to resolve contributor");
            }
        }
        if let Some(series) = aggregate.series.as_deref() {
            if let Err(err) = self.store.get_or_create_series_by_name(series).await {
                tracing::warn!(series, error = %err, "failed to resolve series");
            }
        }
    }

    /// Cover/metadata changes rescan the folder but do not themselves
    /// mutate the book.
    async fn handle_rescan_only(&self, folder: &BookFolder) -> anyhow::Result<()> {
        self.scanner
            .scan(folder)
            .with_context(|| format!("rescanning folder {folder} for cover/metadata change"))?;
        Ok(())
    }

    async fn handle_removed_media(&self, folder: &BookFolder) -> anyhow::Result<()> {
        let Some(book) = self
            .store
            .get_book_by_path(folder.as_path())
            .await
            .context("looking up book for removal")?
        else {
            return Ok(());
        };

        match self.scanner.scan(folder) {
            Err(source) => {
                tracing::info!(folder = %folder, error = %source, "folder gone after removal, deleting book");
                self.store
                    .delete_book(&book.id)
                    .await
                    .context("deleting book after folder gone")?;
            }
            Ok(scan) if scan.audio_files.is_empty() => {
                self.store
                    .delete_book(&book.id)
                    .await
                    .context("deleting book with no remaining audio files")?;
            }
            Ok(_) => {
                self.handle_audio_change(folder).await?;
            }
        }

        Ok(())
    }

    /// The removed path may itself be a book folder (an extensionless
    /// directory removal). Looked up by its exact path, not the computed
    /// book folder.
    async fn handle_removed_ignored(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(book) = self
            .store
            .get_book_by_path(path)
            .await
            .context("looking up book by exact removed path")?
        {
            self.store
                .delete_book(&book.id)
                .await
                .context("deleting book for removed folder")?;
        }
        Ok(())
    }

    async fn extract_and_apply_cover(&self, book: &mut Book, scan: &ScannedItem) {
        match image::extract_and_store(&book.id, scan, self.image_store.as_ref()).await {
            Ok(Some(extracted)) => {
                book.cover_image = Some(CoverImage {
                    filename: format!("{}.jpg", book.id),
                    format_mime: extracted.mime.to_string(),
                    size_bytes: extracted.size,
                });
                if let Err(err) = self.store.update_book(book.clone()).await {
                    tracing::warn!(book = %book.id, error = %err, "failed to persist extracted cover");
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(book = %book.id, error = %err, "cover extraction failed"),
        }
    }

    async fn assign_to_inbox(&self, book: &Book) {
        if !self.config.inbox_enabled {
            return;
        }
        if let Err(err) = self.try_assign_to_inbox(book).await {
            tracing::warn!(book = %book.id, error = %err, "inbox assignment failed, book remains visible");
        }
    }

    async fn try_assign_to_inbox(&self, book: &Book) -> anyhow::Result<()> {
        let settings = self.store.get_server_settings().await?;
        if !settings.inbox_enabled {
            return Ok(());
        }
        let Some(library_id) = self.store.get_default_library().await? else {
            return Ok(());
        };
        let Some(inbox_id) = self.store.get_inbox_for_library(&library_id).await? else {
            return Ok(());
        };
        self.store.admin_add_book_to_collection(&book.id, &inbox_id).await
    }
}

/// A deterministic book id derived from the folder's path, so re-scanning
/// the same folder never needs an existing book's id to converge on it.
fn book_id_for(folder: &BookFolder) -> String {
    let mut hasher = Sha256::new();
    hasher.update(folder.as_path().to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

fn default_title(folder: &BookFolder) -> String {
    folder
        .as_path()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("Untitled")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryBookStore, InMemoryImageStore};
    use std::io::Write;
    use std::path::PathBuf;

    fn write_stub_mp3(path: &Path) {
        let mut f = std::fs::File::create(path).unwrap();
        let bitrate_index: u8 = 8;
        let sample_rate_index: u8 = 0;
        let header = [
            0xFF,
            0xFB,
            (bitrate_index << 4) | (sample_rate_index << 2),
            0b1100_0000,
        ];
        f.write_all(&header).unwrap();
        f.write_all(&[0u8; 512]).unwrap();
    }

    fn processor(store: Arc<InMemoryBookStore>, image_store: Arc<InMemoryImageStore>) -> Processor {
        Processor::new(store, image_store, IngestConfig::default())
    }

    fn synchsafe(size: u32) -> [u8; 4] {
        [
            ((size >> 21) & 0x7F) as u8,
            ((size >> 14) & 0x7F) as u8,
            ((size >> 7) & 0x7F) as u8,
            (size & 0x7F) as u8,
        ]
    }

    fn text_frame(id: &[u8; 4], text: &str) -> Vec<u8> {
        let mut payload = vec![0u8];
        payload.extend_from_slice(text.as_bytes());
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&synchsafe(payload.len() as u32));
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&payload);
        out
    }

    /// An mp3 carrying a `TPE1` (artist) frame, followed by a valid MPEG
    /// frame sync so the scanner accepts it as audio.
    fn write_mp3_with_artist(path: &Path, artist: &str) {
        let mut body = Vec::new();
        body.extend_from_slice(&text_frame(b"TPE1", artist));
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ID3");
        bytes.extend_from_slice(&[4, 0, 0]);
        bytes.extend_from_slice(&synchsafe(body.len() as u32));
        bytes.extend_from_slice(&body);
        bytes.extend_from_slice(&[0xFF, 0xFB, 8u8 << 4, 0b1100_0000]);
        bytes.extend(std::iter::repeat(0u8).take(512));
        std::fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn audio_added_resolves_artist_into_contributor() {
        let dir = tempfile::tempdir().unwrap();
        let book_dir = dir.path().join("Author").join("Book");
        std::fs::create_dir_all(&book_dir).unwrap();
        let mp3 = book_dir.join("01.mp3");
        write_mp3_with_artist(&mp3, "Jane Author");

        let store = Arc::new(InMemoryBookStore::new());
        let image_store = Arc::new(InMemoryImageStore::new());
        let proc = processor(store.clone(), image_store);

        proc.dispatch(Event::added(mp3)).await;

        assert_eq!(store.resolved_contributors(), vec!["Jane Author".to_string()]);
    }

    #[tokio::test]
    async fn audio_added_creates_book_at_folder_path() {
        let dir = tempfile::tempdir().unwrap();
        let book_dir = dir.path().join("Author").join("Book");
        std::fs::create_dir_all(&book_dir).unwrap();
        let mp3 = book_dir.join("01.mp3");
        write_stub_mp3(&mp3);

        let store = Arc::new(InMemoryBookStore::new());
        let image_store = Arc::new(InMemoryImageStore::new());
        let proc = processor(store.clone(), image_store);

        proc.dispatch(Event::added(mp3)).await;

        let book = store.get_book_by_path(&book_dir).await.unwrap().expect("book created");
        assert_eq!(book.path, book_dir);
        assert_eq!(book.title, "Book");
    }

    #[tokio::test]
    async fn second_audio_event_updates_existing_book_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let book_dir = dir.path().join("A").join("B");
        std::fs::create_dir_all(&book_dir).unwrap();
        let first = book_dir.join("01.mp3");
        write_stub_mp3(&first);

        let store = Arc::new(InMemoryBookStore::new());
        let image_store = Arc::new(InMemoryImageStore::new());
        let proc = processor(store.clone(), image_store);

        proc.dispatch(Event::added(first.clone())).await;
        let first_id = store.get_book_by_path(&book_dir).await.unwrap().unwrap().id;

        let second = book_dir.join("02.mp3");
        write_stub_mp3(&second);
        proc.dispatch(Event::added(second)).await;

        let book = store.get_book_by_path(&book_dir).await.unwrap().unwrap();
        assert_eq!(book.id, first_id);
    }

    #[tokio::test]
    async fn removed_audio_deletes_book_when_folder_now_empty() {
        let dir = tempfile::tempdir().unwrap();
        let book_dir = dir.path().join("A").join("B");
        std::fs::create_dir_all(&book_dir).unwrap();
        let mp3 = book_dir.join("01.mp3");
        write_stub_mp3(&mp3);

        let store = Arc::new(InMemoryBookStore::new());
        let image_store = Arc::new(InMemoryImageStore::new());
        let proc = processor(store.clone(), image_store);

        proc.dispatch(Event::added(mp3.clone())).await;
        assert!(store.get_book_by_path(&book_dir).await.unwrap().is_some());

        std::fs::remove_file(&mp3).unwrap();
        proc.dispatch(Event::removed(mp3)).await;

        assert!(store.get_book_by_path(&book_dir).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_audio_updates_book_when_other_files_remain() {
        let dir = tempfile::tempdir().unwrap();
        let book_dir = dir.path().join("A").join("B");
        std::fs::create_dir_all(&book_dir).unwrap();
        let first = book_dir.join("01.mp3");
        let second = book_dir.join("02.mp3");
        write_stub_mp3(&first);
        write_stub_mp3(&second);

        let store = Arc::new(InMemoryBookStore::new());
        let image_store = Arc::new(InMemoryImageStore::new());
        let proc = processor(store.clone(), image_store);

        proc.dispatch(Event::added(first.clone())).await;

        std::fs::remove_file(&first).unwrap();
        proc.dispatch(Event::removed(first)).await;

        assert!(store.get_book_by_path(&book_dir).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn removed_ignored_path_deletes_book_at_exact_folder() {
        let book_dir = PathBuf::from("/L/A/B");
        let store = Arc::new(InMemoryBookStore::new());
        let image_store = Arc::new(InMemoryImageStore::new());
        store
            .create_book(Book::new("id1".into(), book_dir.clone(), "B".into()))
            .await
            .unwrap();

        let proc = processor(store.clone(), image_store);
        proc.dispatch(Event::removed(book_dir.clone())).await;

        assert!(store.get_book_by_path(&book_dir).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_ignored_path_with_no_matching_book_is_a_no_op() {
        let store = Arc::new(InMemoryBookStore::new());
        let image_store = Arc::new(InMemoryImageStore::new());
        let proc = processor(store.clone(), image_store);

        proc.dispatch(Event::removed(PathBuf::from("/L/A/Nonexistent"))).await;
        assert!(store.get_book_by_path(Path::new("/L/A/Nonexistent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cover_event_rescans_without_creating_a_book() {
        let dir = tempfile::tempdir().unwrap();
        let book_dir = dir.path().join("A").join("B");
        std::fs::create_dir_all(&book_dir).unwrap();
        write_stub_mp3(&book_dir.join("01.mp3"));
        let cover = book_dir.join("cover.jpg");
        std::fs::write(&cover, [0xFF, 0xD8, 0xFF, 1, 2, 3]).unwrap();

        let store = Arc::new(InMemoryBookStore::new());
        let image_store = Arc::new(InMemoryImageStore::new());
        let proc = processor(store.clone(), image_store);

        proc.dispatch(Event::added(cover)).await;

        assert!(store.get_book_by_path(&book_dir).await.unwrap().is_none());
    }
}
