use std::path::PathBuf;

/// Cover art recorded against a book once extraction succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub filename: String,
    pub format_mime: String,
    pub size_bytes: u64,
}

/// A persisted book, as seen by this pipeline.
///
/// `BookStore` implementations may carry far more fields (authors, ratings,
/// progress, ...); this pipeline only reads/writes identity and cover
/// fields and treats the rest as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub id: String,
    pub path: PathBuf,
    pub title: String,
    pub cover_image: Option<CoverImage>,
}

impl Book {
    pub fn new(id: String, path: PathBuf, title: String) -> Self {
        Self {
            id,
            path,
            title,
            cover_image: None,
        }
    }
}
