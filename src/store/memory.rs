use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::models::Book;

use super::{BookStore, ImageStore};

/// In-process `BookStore` keyed by folder path, for tests and as a
/// reference implementation: an `RwLock<HashMap<...>>` behind a handful of
/// narrow accessors, with no process-wide singleton — ownership here is
/// just whatever holds this value.
#[derive(Default)]
pub struct InMemoryBookStore {
    books: RwLock<std::collections::HashMap<PathBuf, Book>>,
    contributors: RwLock<Vec<String>>,
    series: RwLock<Vec<String>>,
}

impl InMemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names passed to `get_or_create_contributor_by_name`, in call order.
    pub fn resolved_contributors(&self) -> Vec<String> {
        self.contributors.read().clone()
    }

    /// Names passed to `get_or_create_series_by_name`, in call order.
    pub fn resolved_series(&self) -> Vec<String> {
        self.series.read().clone()
    }
}

#[async_trait]
impl BookStore for InMemoryBookStore {
    async fn get_book_by_path(&self, path: &Path) -> anyhow::Result<Option<Book>> {
        Ok(self.books.read().get(path).cloned())
    }

    async fn create_book(&self, book: Book) -> anyhow::Result<()> {
        self.books.write().insert(book.path.clone(), book);
        Ok(())
    }

    async fn update_book(&self, book: Book) -> anyhow::Result<()> {
        self.books.write().insert(book.path.clone(), book);
        Ok(())
    }

    async fn delete_book(&self, id: &str) -> anyhow::Result<()> {
        self.books.write().retain(|_, b| b.id != id);
        Ok(())
    }

    async fn broadcast_book_created(&self, _book: &Book) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_or_create_contributor_by_name(&self, name: &str) -> anyhow::Result<String> {
        self.contributors.write().push(name.to_string());
        Ok(name.to_ascii_lowercase())
    }

    async fn get_or_create_series_by_name(&self, name: &str) -> anyhow::Result<String> {
        self.series.write().push(name.to_string());
        Ok(name.to_ascii_lowercase())
    }
}

/// In-process content-addressed `ImageStore`, for tests and as a reference
/// implementation.
#[derive(Default)]
pub struct InMemoryImageStore {
    images: RwLock<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn save(&self, id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.images.write().insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn hash(&self, id: &str) -> anyhow::Result<String> {
        let images = self.images.read();
        let bytes = images
            .get(id)
            .ok_or_else(|| anyhow::anyhow!("no image stored for {id}"))?;
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    async fn exists(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.images.read().contains_key(id))
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.images.read().get(id).cloned())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.images.write().remove(id);
        Ok(())
    }
}
