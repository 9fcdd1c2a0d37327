//! External interfaces the pipeline consumes for persistence.
//!
//! These are narrow traits, not implementations: the HTTP API, the SQL
//! schema, authentication, and everything else that ultimately backs a
//! production `BookStore`/`ImageStore` live outside this crate. The
//! in-memory implementations here exist for tests and as a reference for
//! implementers.

mod memory;

use async_trait::async_trait;

use crate::models::Book;

pub use memory::{InMemoryBookStore, InMemoryImageStore};

/// Persistence boundary for books, contributors, and series.
///
/// Implementations must be externally thread-safe: the processor never
/// holds its own lock across a call into this trait, only the per-folder
/// lock, which does not serialize unrelated folders.
#[async_trait]
pub trait BookStore: Send + Sync {
    async fn get_book_by_path(&self, path: &std::path::Path) -> anyhow::Result<Option<Book>>;
    async fn create_book(&self, book: Book) -> anyhow::Result<()>;
    async fn update_book(&self, book: Book) -> anyhow::Result<()>;
    async fn delete_book(&self, id: &str) -> anyhow::Result<()>;

    /// Best-effort, non-fatal: failures are logged by the caller, never
    /// propagated as a handler failure.
    async fn broadcast_book_created(&self, book: &Book) -> anyhow::Result<()>;

    async fn get_or_create_contributor_by_name(&self, name: &str) -> anyhow::Result<String>;
    async fn get_or_create_series_by_name(&self, name: &str) -> anyhow::Result<String>;

    /// Inbox workflow helpers. Default implementations report the feature
    /// as unavailable; a store that supports moderation inboxes overrides
    /// all four.
    async fn get_server_settings(&self) -> anyhow::Result<ServerSettings> {
        Ok(ServerSettings { inbox_enabled: false })
    }

    async fn get_default_library(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn get_inbox_for_library(&self, _library_id: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn admin_add_book_to_collection(&self, _book_id: &str, _collection_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Server-side settings the inbox workflow consults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerSettings {
    pub inbox_enabled: bool,
}

/// Content-addressed image storage, keyed by book id.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, id: &str, bytes: &[u8]) -> anyhow::Result<()>;
    async fn hash(&self, id: &str) -> anyhow::Result<String>;
    async fn exists(&self, id: &str) -> anyhow::Result<bool>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}
