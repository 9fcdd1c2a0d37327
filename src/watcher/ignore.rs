use std::path::Path;

use glob::Pattern;

use crate::config::WatcherOptions;

/// Compiled ignore policy derived from [`WatcherOptions`].
pub struct IgnorePolicy {
    patterns: Vec<Pattern>,
    ignore_hidden: bool,
}

impl IgnorePolicy {
    pub fn new(options: &WatcherOptions) -> Self {
        let patterns = options
            .ignore_patterns
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();
        Self {
            patterns,
            ignore_hidden: options.ignore_hidden,
        }
    }

    /// True if `path` should be dropped: any path component beginning with
    /// `.` (when `ignore_hidden`), or the filename matches an ignore glob.
    pub fn should_ignore(&self, path: &Path) -> bool {
        if self.ignore_hidden && is_hidden(path) {
            return true;
        }

        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if self.patterns.iter().any(|p| p.matches(name)) {
                return true;
            }
        }

        false
    }
}

fn is_hidden(path: &Path) -> bool {
    path.components().any(|c| {
        let s = c.as_os_str().to_string_lossy();
        s.starts_with('.') && s != "." && s != ".."
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn hidden_components_are_ignored_by_default() {
        let policy = IgnorePolicy::new(&WatcherOptions::default());
        assert!(policy.should_ignore(&PathBuf::from("/L/.git/config")));
        assert!(!policy.should_ignore(&PathBuf::from("/L/Author/Book/01.mp3")));
    }

    #[test]
    fn default_glob_patterns_match() {
        let policy = IgnorePolicy::new(&WatcherOptions::default());
        assert!(policy.should_ignore(&PathBuf::from("/L/A/.DS_Store")));
        assert!(policy.should_ignore(&PathBuf::from("/L/A/part.tmp")));
        assert!(policy.should_ignore(&PathBuf::from("/L/A/Thumbs.db")));
    }

    #[test]
    fn ignore_hidden_false_allows_dotfiles() {
        let mut opts = WatcherOptions::default();
        opts.ignore_hidden = false;
        let policy = IgnorePolicy::new(&opts);
        assert!(!policy.should_ignore(&PathBuf::from("/L/.git/config")));
    }
}
