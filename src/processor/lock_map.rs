use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

/// A concurrent mapping from book folder to a mutex, owned by one
/// [`super::Processor`] instance (never a process-wide singleton — its
/// lifetime is tied to the processor that constructed it).
///
/// The map only grows: entries are never removed under normal operation,
/// bounded in practice by the library's folder count. Lookups are
/// concurrent read-locks; first-time insertion is a double-checked
/// read-then-write so the common case (folder already has an entry) never
/// takes the write lock.
#[derive(Default)]
pub struct FolderLockMap {
    locks: RwLock<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FolderLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, folder: &std::path::Path) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.read().get(folder) {
            return existing.clone();
        }
        let mut locks = self.locks.write();
        locks
            .entry(folder.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Attempts to acquire the folder's lock without blocking. Returns
    /// `None` if another actor already holds it — the processor drops the
    /// event rather than queueing.
    pub fn try_lock(&self, folder: &std::path::Path) -> Option<OwnedFolderGuard> {
        let mutex = self.lock_for(folder);
        mutex.try_lock_owned().ok().map(OwnedFolderGuard)
    }

    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }
}

/// An owned guard on a folder's lock, held across an `.await` by the
/// dispatched handler task.
pub struct OwnedFolderGuard(tokio::sync::OwnedMutexGuard<()>);

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[tokio::test]
    async fn second_try_lock_fails_while_first_is_held() {
        let map = FolderLockMap::new();
        let folder = Path::new("/L/A/B");
        let first = map.try_lock(folder);
        assert!(first.is_some());
        let second = map.try_lock(folder);
        assert!(second.is_none());
        drop(first);
        let third = map.try_lock(folder);
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn different_folders_lock_independently() {
        let map = FolderLockMap::new();
        let a = map.try_lock(Path::new("/L/A")).unwrap();
        let b = map.try_lock(Path::new("/L/B")).unwrap();
        drop(a);
        drop(b);
        assert_eq!(map.len(), 2);
    }
}
