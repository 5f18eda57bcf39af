//! # inkpage
//!
//! Open large EPUB books instantly on slow e-paper readers.
//!
//! ## Why this crate?
//!
//! Extracting and paginating a whole novel takes several seconds on the small
//! single-board computers e-paper readers are built around. Waiting for it
//! every time a book is opened is unacceptable, so this crate splits the work:
//! a quick pass lays out the first few dozen pages and the reader can start
//! at once, while a full pass finishes the book on a background task and the
//! result is swapped in without moving the reader off their page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! EPUB
//!  │
//!  ├─ 1. Identity   (path, mtime, size) → fingerprint
//!  ├─ 2. Cache      Full hit → done; Partial hit → skip to 5
//!  ├─ 3. Quick      first items → text → normalize → chapters → bounded layout
//!  ├─ 4. Store      Partial artifact, shown immediately
//!  ├─ 5. Full       background: every item → normalize → layout → store Full
//!  └─ 6. Complete   completion event; foreground swaps pages, keeps position
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use inkpage::{ReaderConfig, ReaderEvent, ReaderSession};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ReaderConfig::default();
//!     let mut session = ReaderSession::new(config.clone());
//!
//!     let page = session.open(Path::new("moby-dick.epub")).await;
//!     println!("{page:?}");
//!
//!     session.handle(ReaderEvent::Turn(1)).await;
//!     // Between input events:
//!     if session.poll_completion() {
//!         println!("now {} pages", session.page_count());
//!     }
//!     session.shutdown(config.shutdown_grace()).await;
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `inkpage` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! inkpage = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bookmarks;
pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod identity;
pub mod library;
mod persist;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod source;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bookmarks::{clamp_page, Bookmark, BookmarkStore};
pub use cache::{CacheState, CacheStore, CachedArtifact, Completeness};
pub use config::{QuickPassLimits, ReaderConfig, ReaderConfigBuilder};
pub use error::{DecodeError, ReaderError};
pub use extract::{ExtractionPipeline, Prepared};
pub use identity::{DocumentIdentity, Fingerprint};
pub use library::{BookEntry, Library};
pub use pipeline::chapters::{Chapter, ChapterLimits};
pub use pipeline::layout::{layout, layout_bounded, MonospaceMetrics, Page, PageGeometry, TextMeasure};
pub use pipeline::normalize::normalize;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{Confirm, ReaderEvent, ReaderSession, RenderPayload};
pub use source::{ContentItem, DocumentSource, EpubOpener, MemorySource, SourceOpener};
pub use worker::{
    BackgroundJob, BackgroundWorker, Completion, CompletionCallback, CompletionChannel,
    CompletionSender, JobOutcome,
};
