use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DISC_PATTERN: Regex = Regex::new(r"(?i)^(cd|disc|disk)\s*0*\d+$").unwrap();
}

/// The canonical identity of a book: a folder path with disc subfolders
/// collapsed into their parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookFolder(PathBuf);

impl BookFolder {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Resolves the book folder that owns `path`.
    ///
    /// If the immediate parent directory name matches the disc pattern
    /// (`cd|disc|disk` followed by optional whitespace and a digit,
    /// case-insensitive), the book folder is the grandparent; otherwise it
    /// is the parent. Idempotent: resolving the result again yields itself,
    /// since a book folder's own name never matches the disc pattern once
    /// collapsed (and if it did, `resolve` only looks at `path`'s parent).
    pub fn resolve(path: &Path) -> Option<Self> {
        let parent = path.parent()?;
        let is_disc = parent
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| DISC_PATTERN.is_match(n))
            .unwrap_or(false);

        if is_disc {
            parent.parent().map(|gp| BookFolder(gp.to_path_buf()))
        } else {
            Some(BookFolder(parent.to_path_buf()))
        }
    }
}

impl std::fmt::Display for BookFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(p: &str) -> PathBuf {
        BookFolder::resolve(Path::new(p)).unwrap().into_path_buf()
    }

    #[test]
    fn plain_file_resolves_to_parent() {
        assert_eq!(resolve("/L/Author/Book/01.mp3"), PathBuf::from("/L/Author/Book"));
    }

    #[test]
    fn disc_subfolder_collapses_to_grandparent() {
        assert_eq!(resolve("/L/A/B/CD1/01.mp3"), PathBuf::from("/L/A/B"));
        assert_eq!(resolve("/L/A/B/cd 1/01.mp3"), PathBuf::from("/L/A/B"));
        assert_eq!(resolve("/L/A/B/Disc 01/01.mp3"), PathBuf::from("/L/A/B"));
        assert_eq!(resolve("/L/A/B/Disk2/01.mp3"), PathBuf::from("/L/A/B"));
    }

    #[test]
    fn lookalike_names_do_not_match_disc_pattern() {
        for name in ["Discworld", "Discs", "CDBook", "CD", "Disc"] {
            let p = PathBuf::from(format!("/L/A/B/{name}/01.mp3"));
            assert_eq!(
                resolve(p.to_str().unwrap()),
                PathBuf::from(format!("/L/A/B/{name}"))
            );
        }
    }

    #[test]
    fn resolution_is_stable_under_reapplication() {
        let once = BookFolder::resolve(Path::new("/L/A/B/CD1/01.mp3")).unwrap();
        // Resolving a direct child of the already-collapsed folder agrees.
        let child = once.as_path().join("02.mp3");
        let twice = BookFolder::resolve(&child).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn root_level_file_has_no_book_folder() {
        assert!(BookFolder::resolve(Path::new("/")).is_none());
    }
}
