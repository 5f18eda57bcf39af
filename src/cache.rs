//! Fingerprint-keyed artifact cache.
//!
//! One gzip-compressed JSON record per document version, named
//! `<fingerprint>.json.gz`. Records are replaced atomically (temp file in the
//! same directory, fsync, rename), so a reader never observes a torn write and
//! a crash mid-store leaves the previous record in place.
//!
//! Anything wrong with a record on load (truncated, not gzip, bad JSON, written
//! for another fingerprint) is a cache miss. The caller re-extracts.

use crate::error::ReaderError;
use crate::identity::{DocumentIdentity, Fingerprint};
use crate::persist::write_atomic;
use crate::pipeline::layout::Page;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_SUFFIX: &str = ".json.gz";

/// Whether an artifact covers the whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    /// Quick pass: the leading pages only.
    Partial,
    /// Full pass: every page.
    Full,
}

/// Lifecycle of one document in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Uncached,
    PartialReady,
    FullReady,
}

impl From<Completeness> for CacheState {
    fn from(c: Completeness) -> Self {
        match c {
            Completeness::Partial => CacheState::PartialReady,
            Completeness::Full => CacheState::FullReady,
        }
    }
}

/// Extraction result for one document version.
///
/// Never mutated once built; a newer pass produces a new artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedArtifact {
    pub normalized_text: String,
    pub pages: Vec<Page>,
    pub chapters: Vec<String>,
    pub completeness: Completeness,
    pub produced_at: DateTime<Utc>,
}

impl CachedArtifact {
    pub fn new(
        normalized_text: String,
        pages: Vec<Page>,
        chapters: Vec<String>,
        completeness: Completeness,
    ) -> Self {
        Self {
            normalized_text,
            pages,
            chapters,
            completeness,
            produced_at: Utc::now(),
        }
    }

    /// A one-page artifact carrying `message`, for documents that could not
    /// be read at all. Marked Full: no further pass will improve it.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(String::new(), vec![Page::single(message)], Vec::new(), Completeness::Full)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_full(&self) -> bool {
        self.completeness == Completeness::Full
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordRef<'a> {
    fingerprint: &'a Fingerprint,
    source_path: &'a Path,
    #[serde(flatten)]
    artifact: &'a CachedArtifact,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    fingerprint: Fingerprint,
    #[allow(dead_code)]
    source_path: PathBuf,
    #[serde(flatten)]
    artifact: CachedArtifact,
}

/// Directory of cache records.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// The directory is created on first store.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fingerprint for a document version. Same as [`Fingerprint::compute`].
    pub fn fingerprint(path: &Path, mtime_secs: i64, mtime_nanos: u32, size: u64) -> Fingerprint {
        Fingerprint::compute(path, mtime_secs, mtime_nanos, size)
    }

    pub fn record_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}{RECORD_SUFFIX}"))
    }

    /// The cached artifact, or `None` on any miss. Damaged records are
    /// logged and treated as absent.
    pub fn load(&self, identity: &DocumentIdentity) -> Option<CachedArtifact> {
        match self.try_load(identity) {
            Ok(found) => found,
            Err(e) => {
                warn!("{e}; ignoring cached record");
                None
            }
        }
    }

    fn try_load(&self, identity: &DocumentIdentity) -> Result<Option<CachedArtifact>, ReaderError> {
        let path = self.record_path(&identity.fingerprint);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ReaderError::CacheCorruption {
                    path,
                    detail: e.to_string(),
                })
            }
        };

        let record: Record = serde_json::from_reader(GzDecoder::new(BufReader::new(file)))
            .map_err(|e| ReaderError::CacheCorruption {
                path: path.clone(),
                detail: e.to_string(),
            })?;

        if record.fingerprint != identity.fingerprint {
            return Err(ReaderError::CacheCorruption {
                path,
                detail: format!("written for {} not {}", record.fingerprint, identity.fingerprint),
            });
        }
        Ok(Some(record.artifact))
    }

    /// Persist `artifact`, replacing any previous record for this identity.
    pub fn store(&self, identity: &DocumentIdentity, artifact: &CachedArtifact) -> Result<(), ReaderError> {
        let record = RecordRef {
            fingerprint: &identity.fingerprint,
            source_path: &identity.path,
            artifact,
        };
        write_atomic(&self.record_path(&identity.fingerprint), |file| {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer(&mut encoder, &record).map_err(io::Error::other)?;
            encoder.finish()?.flush()
        })?;

        debug!(
            "Stored {:?} artifact for {} ({} pages)",
            artifact.completeness,
            identity.display_name(),
            artifact.page_count()
        );
        Ok(())
    }

    /// Remove the record for this identity. Absent records are not an error.
    pub fn invalidate(&self, identity: &DocumentIdentity) -> Result<(), ReaderError> {
        let path = self.record_path(&identity.fingerprint);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Invalidated cache for {}", identity.display_name());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ReaderError::Persistence { path, source }),
        }
    }

    pub fn state(&self, identity: &DocumentIdentity) -> CacheState {
        self.load(identity)
            .map(|a| a.completeness.into())
            .unwrap_or(CacheState::Uncached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity(name: &str) -> DocumentIdentity {
        DocumentIdentity::new(format!("/books/{name}"), 1_700_000_000, 0, 4096)
    }

    fn artifact(completeness: Completeness) -> CachedArtifact {
        CachedArtifact::new(
            "One two.\n\nThree.".into(),
            vec![Page::new(vec!["One two.".into(), "".into(), "Three.".into()])],
            vec!["Opening".into()],
            completeness,
        )
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let id = identity("a.epub");
        let a = artifact(Completeness::Partial);
        store.store(&id, &a).unwrap();
        assert_eq!(store.load(&id), Some(a));
    }

    #[test]
    fn state_follows_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("nested"));
        let id = identity("a.epub");
        assert_eq!(store.state(&id), CacheState::Uncached);
        store.store(&id, &artifact(Completeness::Partial)).unwrap();
        assert_eq!(store.state(&id), CacheState::PartialReady);
        store.store(&id, &artifact(Completeness::Full)).unwrap();
        assert_eq!(store.state(&id), CacheState::FullReady);
        store.invalidate(&id).unwrap();
        assert_eq!(store.state(&id), CacheState::Uncached);
        // Second invalidate is a no-op.
        store.invalidate(&id).unwrap();
    }

    #[test]
    fn corrupt_record_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let id = identity("a.epub");
        std::fs::write(store.record_path(&id.fingerprint), b"not gzip at all").unwrap();
        assert_eq!(store.load(&id), None);
        assert_eq!(store.state(&id), CacheState::Uncached);
    }

    #[test]
    fn truncated_record_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let id = identity("a.epub");
        store.store(&id, &artifact(Completeness::Full)).unwrap();
        let path = store.record_path(&id.fingerprint);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert_eq!(store.load(&id), None);
    }

    #[test]
    fn record_for_other_fingerprint_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let a = identity("a.epub");
        let b = identity("b.epub");
        store.store(&a, &artifact(Completeness::Full)).unwrap();
        std::fs::copy(store.record_path(&a.fingerprint), store.record_path(&b.fingerprint)).unwrap();
        assert_eq!(store.load(&b), None);
    }

    #[test]
    fn store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        store.store(&identity("a.epub"), &artifact(Completeness::Partial)).unwrap();
        store.store(&identity("a.epub"), &artifact(Completeness::Full)).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(RECORD_SUFFIX));
    }

    #[test]
    fn record_uses_external_field_names() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path());
        let id = identity("a.epub");
        store.store(&id, &artifact(Completeness::Partial)).unwrap();
        let file = File::open(store.record_path(&id.fingerprint)).unwrap();
        let json: serde_json::Value = serde_json::from_reader(GzDecoder::new(file)).unwrap();
        for key in ["fingerprint", "sourcePath", "normalizedText", "pages", "chapters", "completeness", "producedAt"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["completeness"], "partial");
    }

    #[test]
    fn degraded_artifact_has_single_page() {
        let a = CachedArtifact::degraded("Book not found: x.epub");
        assert_eq!(a.page_count(), 1);
        assert_eq!(a.pages[0].lines, vec!["Book not found: x.epub"]);
        assert!(a.chapters.is_empty());
    }
}
