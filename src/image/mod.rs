//! Cover extraction and content-addressed storage.
//!
//! Invoked separately from scanning (after book creation/update): opens
//! the first natural-sorted audio file, pulls its primary embedded
//! artwork, detects the format from magic bytes, and writes it to an
//! [`crate::store::ImageStore`] keyed by book id.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::models::ScannedItem;
use crate::parsers::{id3, mp4};
use crate::store::ImageStore;

/// Outcome of a successful cover extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCover {
    pub sha256_hex: String,
    pub size: u64,
    pub mime: &'static str,
}

/// Detects an image format from its magic bytes. Returns `None` for
/// anything unrecognized (not an error: the caller treats it the same as
/// no artwork found).
pub fn detect_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Extracts embedded artwork from the first (natural-sorted) audio file in
/// `scan`, if its container carries any. `scan.audio_files` is already
/// natural-sorted by the scanner, so the first entry is the first audio
/// file in playback order.
fn find_embedded_cover_bytes(scan: &ScannedItem) -> Option<(Vec<u8>, &'static str)> {
    let first = scan.audio_files.first()?;
    let bytes = std::fs::read(&first.path).ok()?;

    let ext = first
        .path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let cover = match ext.as_str() {
        "m4a" | "m4b" | "mp4" => mp4::extract_cover(&bytes).ok().flatten()?,
        "mp3" => id3::extract_cover(&bytes)?,
        _ => return None,
    };

    let mime = detect_mime(&cover)?;
    Some((cover, mime))
}

/// Reads a cover from an external image file in the folder (cover.jpg,
/// folder.png, ...), used when no embedded artwork is found.
fn find_external_cover_bytes(scan: &ScannedItem) -> Option<(Vec<u8>, &'static str)> {
    for path in &scan.image_files {
        if let Ok(bytes) = std::fs::read(path) {
            if let Some(mime) = detect_mime(&bytes) {
                return Some((bytes, mime));
            }
        }
    }
    None
}

/// Picks the primary cover for `scan`: embedded artwork from the first
/// audio file takes priority over an external cover image.
fn find_cover_bytes(scan: &ScannedItem) -> Option<(Vec<u8>, &'static str)> {
    find_embedded_cover_bytes(scan).or_else(|| find_external_cover_bytes(scan))
}

/// Writes `bytes` to `store` keyed by `book_id`, returning the extracted
/// cover's hash/size/mime, or `None` ("no cover", not an error) if no
/// recognizable image was supplied.
pub async fn extract_and_store(
    book_id: &str,
    scan: &ScannedItem,
    store: &dyn ImageStore,
) -> anyhow::Result<Option<ExtractedCover>> {
    let Some((bytes, mime)) = find_cover_bytes(scan) else {
        return Ok(None);
    };

    store.save(book_id, &bytes).await?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256_hex = hex::encode(hasher.finalize());

    Ok(Some(ExtractedCover {
        sha256_hex,
        size: bytes.len() as u64,
        mime,
    }))
}

/// The on-disk path this pipeline's filesystem layout assigns a book's
/// cover: `{base}/covers/{book_id}.jpg`.
pub fn cover_path(base: &Path, book_id: &str) -> std::path::PathBuf {
    base.join("covers").join(format!("{book_id}.jpg"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookFolder;
    use crate::store::InMemoryImageStore;
    use std::path::PathBuf;

    #[test]
    fn detects_known_magic_bytes() {
        assert_eq!(detect_mime(&[0xFF, 0xD8, 0xFF, 0x00]), Some("image/jpeg"));
        assert_eq!(detect_mime(&[0x89, 0x50, 0x4E, 0x47]), Some("image/png"));
        assert_eq!(detect_mime(b"GIF89a"), Some("image/gif"));
        let mut webp = b"RIFF".to_vec();
        webp.extend_from_slice(&[0, 0, 0, 0]);
        webp.extend_from_slice(b"WEBP");
        assert_eq!(detect_mime(&webp), Some("image/webp"));
        assert_eq!(detect_mime(b"not an image"), None);
    }

    #[tokio::test]
    async fn no_cover_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let folder = BookFolder::resolve(&dir.path().join("01.mp3")).unwrap();
        let scan = ScannedItem::empty(folder);
        let store = InMemoryImageStore::new();
        let result = extract_and_store("book-1", &scan, &store).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn embedded_cover_is_preferred_over_external_file() {
        let dir = tempfile::tempdir().unwrap();
        let mp3_path = dir.path().join("01.mp3");
        let embedded_bytes = [0xFFu8, 0xD8, 0xFF, 9, 9, 9];
        std::fs::write(&mp3_path, id3_with_apic(&embedded_bytes)).unwrap();

        let external_path = dir.path().join("cover.jpg");
        std::fs::write(&external_path, [0xFF, 0xD8, 0xFF, 1, 2, 3]).unwrap();

        let folder = BookFolder::resolve(&mp3_path).unwrap();
        let mut scan = ScannedItem::empty(folder);
        scan.audio_files.push(crate::models::AudioEntry {
            path: mp3_path.clone(),
            metadata: crate::models::Metadata::new(mp3_path),
        });
        scan.image_files.push(external_path);

        let store = InMemoryImageStore::new();
        let extracted = extract_and_store("book-1", &scan, &store).await.unwrap().unwrap();
        assert_eq!(extracted.mime, "image/jpeg");
        let mut hasher = Sha256::new();
        hasher.update(embedded_bytes);
        assert_eq!(extracted.sha256_hex, hex::encode(hasher.finalize()));
    }

    /// A minimal ID3v2 tag with a single `APIC` frame carrying `image_bytes`.
    fn id3_with_apic(image_bytes: &[u8]) -> Vec<u8> {
        fn synchsafe(size: u32) -> [u8; 4] {
            [
                ((size >> 21) & 0x7F) as u8,
                ((size >> 14) & 0x7F) as u8,
                ((size >> 7) & 0x7F) as u8,
                (size & 0x7F) as u8,
            ]
        }
        let mut payload = vec![0u8]; // encoding
        payload.extend_from_slice(b"image/jpeg");
        payload.push(0); // NUL terminator
        payload.push(3); // picture type: front cover
        payload.push(0); // empty description, NUL terminated
        payload.extend_from_slice(image_bytes);

        let mut frame = Vec::new();
        frame.extend_from_slice(b"APIC");
        frame.extend_from_slice(&synchsafe(payload.len() as u32));
        frame.extend_from_slice(&[0, 0]); // flags
        frame.extend_from_slice(&payload);

        let mut out = Vec::new();
        out.extend_from_slice(b"ID3");
        out.extend_from_slice(&[4, 0, 0]); // version 2.4.0, flags
        out.extend_from_slice(&synchsafe(frame.len() as u32));
        out.extend_from_slice(&frame);
        out
    }

    #[tokio::test]
    async fn extracted_hash_matches_store_hash() {
        let dir = tempfile::tempdir().unwrap();
        let cover_path = dir.path().join("cover.jpg");
        std::fs::write(&cover_path, [0xFF, 0xD8, 0xFF, 1, 2, 3]).unwrap();

        let folder = BookFolder::resolve(&dir.path().join("01.mp3")).unwrap();
        let mut scan = ScannedItem::empty(folder);
        scan.image_files.push(PathBuf::from(&cover_path));

        let store = InMemoryImageStore::new();
        let extracted = extract_and_store("book-1", &scan, &store).await.unwrap().unwrap();
        let stored_hash = store.hash("book-1").await.unwrap();
        assert_eq!(extracted.sha256_hex, stored_hash);
        assert_eq!(extracted.mime, "image/jpeg");
    }
}
