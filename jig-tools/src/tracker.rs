//! Read-timestamp tracking for file mutations
//!
//! `view` records when a file was last read; `edit`/`write` refuse to touch
//! a file that was never viewed or whose mtime is newer than the recorded
//! read (someone else changed it underneath us).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Default)]
pub struct FileTracker {
    read_times: RwLock<HashMap<PathBuf, SystemTime>>,
}

/// Why a mutation was refused
#[derive(Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Safe to modify
    Fresh,
    /// Never viewed in this process
    NotRead,
    /// Modified on disk after our last read
    Stale,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the current on-disk content was read just now
    pub fn mark_read(&self, path: &Path) {
        self.read_times
            .write()
            .insert(path.to_path_buf(), SystemTime::now());
    }

    pub fn was_read(&self, path: &Path) -> bool {
        self.read_times.read().contains_key(path)
    }

    /// Check whether `path` may be mutated
    pub fn freshness(&self, path: &Path) -> Freshness {
        let read_at = match self.read_times.read().get(path) {
            Some(time) => *time,
            None => return Freshness::NotRead,
        };
        let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(time) => time,
            // A missing file cannot be stale; create/write handles it.
            Err(_) => return Freshness::Fresh,
        };
        if modified > read_at {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    pub fn forget(&self, path: &Path) {
        self.read_times.write().remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_read_initially() {
        let tracker = FileTracker::new();
        assert_eq!(
            tracker.freshness(Path::new("/nope.rs")),
            Freshness::NotRead
        );
    }

    #[test]
    fn test_fresh_after_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "one").unwrap();

        let tracker = FileTracker::new();
        tracker.mark_read(&file);
        assert!(tracker.was_read(&file));
        assert_eq!(tracker.freshness(&file), Freshness::Fresh);
    }

    #[test]
    fn test_stale_after_external_modification() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "one").unwrap();

        let tracker = FileTracker::new();
        tracker.mark_read(&file);
        // Ensure the new mtime is measurably later.
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&file, "two").unwrap();
        assert_eq!(tracker.freshness(&file), Freshness::Stale);
    }

    #[test]
    fn test_missing_file_is_fresh_once_read() {
        let tracker = FileTracker::new();
        let path = Path::new("/tmp/jig-tracker-missing-file");
        tracker.mark_read(path);
        assert_eq!(tracker.freshness(path), Freshness::Fresh);
    }

    #[test]
    fn test_forget() {
        let tracker = FileTracker::new();
        let path = Path::new("/tmp/x");
        tracker.mark_read(path);
        tracker.forget(path);
        assert_eq!(tracker.freshness(path), Freshness::NotRead);
    }
}
