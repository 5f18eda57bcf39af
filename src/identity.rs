//! Document identity and the fingerprint derived from it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Hex token naming one version of one document.
///
/// Derived from path, modification time and size. Editing a file in a way
/// that changes neither mtime nor size goes unnoticed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 over the three fields, truncated to 16 bytes (32 hex chars).
    pub fn compute(path: &Path, mtime_secs: i64, mtime_nanos: u32, size: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(mtime_secs.to_le_bytes());
        hasher.update(mtime_nanos.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(size.to_le_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(path, mtime, size)` of a document plus its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentIdentity {
    pub path: PathBuf,
    pub mtime_secs: i64,
    pub mtime_nanos: u32,
    pub size: u64,
    pub fingerprint: Fingerprint,
}

impl DocumentIdentity {
    /// Identity from explicit fields.
    pub fn new(path: impl Into<PathBuf>, mtime_secs: i64, mtime_nanos: u32, size: u64) -> Self {
        let path = path.into();
        let fingerprint = Fingerprint::compute(&path, mtime_secs, mtime_nanos, size);
        Self {
            path,
            mtime_secs,
            mtime_nanos,
            size,
            fingerprint,
        }
    }

    /// Stat `path`. A file that cannot be stat'ed gets epoch mtime and size 0.
    pub fn of(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let (secs, nanos, size) = match std::fs::metadata(path) {
            Ok(meta) => {
                let (secs, nanos) = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| (d.as_secs() as i64, d.subsec_nanos()))
                    .unwrap_or((0, 0));
                (secs, nanos, meta.len())
            }
            Err(_) => (0, 0, 0),
        };
        Self::new(path, secs, nanos, size)
    }

    /// File name for display, falling back to the full path.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}
