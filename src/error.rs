//! Error types for the inkpage library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ReaderError`] — an operation could not complete: the document
//!   container is unreadable, a persistence write failed, a cache record is
//!   corrupt, or the configuration is invalid. None of these are fatal to
//!   the host; the pipeline turns them into a degraded but renderable result
//!   before they ever reach the foreground.
//!
//! * [`DecodeError`] — **Non-fatal**: one content item of a document could
//!   not be decoded. The item is skipped and extraction continues with the
//!   next one.

use std::path::PathBuf;
use thiserror::Error;

/// Operation-level errors returned by the inkpage library.
///
/// Per-item failures use [`DecodeError`] and never abort a pass.
#[derive(Debug, Error)]
pub enum ReaderError {
    // ── Document errors ───────────────────────────────────────────────────
    /// Book file was not found at the given path.
    #[error("Book not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The whole document container is unreadable.
    #[error("Cannot read '{path}': {detail}")]
    Container { path: PathBuf, detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// A cache or bookmark record could not be written or removed.
    #[error("Failed to persist '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted cache record exists but cannot be decoded.
    #[error("Cache record '{path}' is corrupt: {detail}")]
    CacheCorruption { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (a background task panicked, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReaderError {
    /// Text shown on the single page of a degraded artifact.
    pub fn reader_message(&self) -> String {
        match self {
            ReaderError::FileNotFound { path } => format!(
                "Book not found: {}",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            ),
            other => format!("Error loading book: {other}"),
        }
    }
}

/// A non-fatal error for a single content item.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Index past the end of the reading order.
    #[error("Item {index}: out of range")]
    OutOfRange { index: usize },

    /// The manifest points at an entry the container does not have.
    #[error("Item {index}: '{href}' is missing from the container")]
    Missing { index: usize, href: String },

    /// Entry bytes could not be read from the container.
    #[error("Item {index}: '{href}' could not be read: {detail}")]
    Unreadable {
        index: usize,
        href: String,
        detail: String,
    },
}
