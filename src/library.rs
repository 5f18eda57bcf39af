//! Book discovery and the last-opened-book record.

use crate::error::ReaderError;
use crate::persist::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

const LAST_BOOK_FILE: &str = "last_book.json";
const BOOK_EXTENSIONS: &[&str] = &["epub"];

/// A book file found in the books directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LastBook {
    path: PathBuf,
    filename: String,
    last_opened: DateTime<Utc>,
}

/// The books directory plus where the last-opened record lives.
#[derive(Debug, Clone)]
pub struct Library {
    books_dir: PathBuf,
    state_dir: PathBuf,
}

impl Library {
    pub fn new(books_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            books_dir: books_dir.into(),
            state_dir: state_dir.into(),
        }
    }

    pub fn books_dir(&self) -> &Path {
        &self.books_dir
    }

    /// Book files in the books directory, most recently modified first.
    /// A missing or unreadable directory yields an empty list.
    pub fn scan(&self) -> Vec<BookEntry> {
        let entries = match std::fs::read_dir(&self.books_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan {}: {e}", self.books_dir.display());
                return Vec::new();
            }
        };

        let mut books: Vec<BookEntry> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_book(&entry.path()))
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Some(BookEntry {
                    file_name: entry.file_name().to_string_lossy().into_owned(),
                    path: entry.path(),
                    modified: modified.into(),
                    size: meta.len(),
                })
            })
            .collect();

        books.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        debug!("Found {} books in {}", books.len(), self.books_dir.display());
        books
    }

    /// Record `path` as the book to reopen next time.
    pub fn save_last_book(&self, path: &Path) -> Result<(), ReaderError> {
        let record = LastBook {
            path: path.to_path_buf(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            last_opened: Utc::now(),
        };
        write_atomic(&self.state_dir.join(LAST_BOOK_FILE), |file| {
            serde_json::to_writer_pretty(file, &record).map_err(io::Error::other)
        })?;
        Ok(())
    }

    /// The last opened book if it still exists, otherwise the newest book.
    pub fn last_book(&self) -> Option<PathBuf> {
        let record_path = self.state_dir.join(LAST_BOOK_FILE);
        match std::fs::read(&record_path) {
            Ok(bytes) => match serde_json::from_slice::<LastBook>(&bytes) {
                Ok(last) if last.path.is_file() => return Some(last.path),
                Ok(last) => info!("Last book {} is gone", last.path.display()),
                Err(e) => warn!("{} unreadable: {e}", record_path.display()),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("{} unreadable: {e}", record_path.display()),
        }
        self.scan().into_iter().next().map(|b| b.path)
    }
}

fn is_book(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| BOOK_EXTENSIONS.iter().any(|b| ext.eq_ignore_ascii_case(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        // Keep modification times distinct.
        std::thread::sleep(Duration::from_millis(20));
        path
    }

    #[test]
    fn scan_lists_books_newest_first() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "old.epub");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "LOUD.EPUB");
        touch(dir.path(), "new.epub");
        std::fs::create_dir(dir.path().join("folder.epub")).unwrap();

        let library = Library::new(dir.path(), dir.path().join("state"));
        let names: Vec<_> = library.scan().into_iter().map(|b| b.file_name).collect();
        assert_eq!(names, vec!["new.epub", "LOUD.EPUB", "old.epub"]);
    }

    #[test]
    fn scan_of_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let library = Library::new(dir.path().join("absent"), dir.path());
        assert!(library.scan().is_empty());
        assert!(library.last_book().is_none());
    }

    #[test]
    fn last_book_round_trips() {
        let dir = TempDir::new().unwrap();
        let first = touch(dir.path(), "first.epub");
        touch(dir.path(), "second.epub");
        let library = Library::new(dir.path(), dir.path().join("state"));

        library.save_last_book(&first).unwrap();
        assert_eq!(library.last_book(), Some(first));
    }

    #[test]
    fn last_book_falls_back_to_newest() {
        let dir = TempDir::new().unwrap();
        let gone = touch(dir.path(), "gone.epub");
        let newest = touch(dir.path(), "newest.epub");
        let library = Library::new(dir.path(), dir.path().join("state"));

        library.save_last_book(&gone).unwrap();
        std::fs::remove_file(&gone).unwrap();
        assert_eq!(library.last_book(), Some(newest));
    }
}
