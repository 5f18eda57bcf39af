//! The foreground reader: one active document, its position, and the
//! payloads a display layer draws.
//!
//! The session never blocks on the full pass. It polls the completion queue
//! between input events; a completion for the open document swaps in the
//! full page list and keeps the reader on the same page number.

use crate::bookmarks::{clamp_page, BookmarkStore};
use crate::cache::{CacheState, CachedArtifact};
use crate::config::ReaderConfig;
use crate::extract::{ExtractionPipeline, Prepared};
use crate::identity::{DocumentIdentity, Fingerprint};
use crate::library::Library;
use crate::pipeline::chapters::{estimate_page, with_page_estimates, Chapter};
use crate::source::{EpubOpener, SourceOpener};
use crate::worker::{BackgroundJob, Completion, CompletionChannel};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MAIN_MENU: &[&str] = &[
    "Resume",
    "Jump Pages",
    "Skip to Chapter",
    "Refresh Book",
    "Select Book",
    "Sleep",
    "Shutdown",
];

pub const JUMP_MENU: &[&str] = &[
    "+5 pages",
    "+10 pages",
    "+50 pages",
    "+100 pages",
    "-5 pages",
    "-10 pages",
    "-50 pages",
    "-100 pages",
    "Back",
];

const JUMP_DELTAS: &[i64] = &[5, 10, 50, 100, -5, -10, -50, -100];

const COMPLETION_POLL: Duration = Duration::from_millis(100);

/// Page delta for a [`JUMP_MENU`] entry; `None` for "Back".
pub fn jump_delta(index: usize) -> Option<i64> {
    JUMP_DELTAS.get(index).copied()
}

/// Input from the device layer, already decoded from buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Move by a signed number of pages.
    Turn(i64),
    /// Jump to the chapter at this index of the chapter list.
    SelectChapter(usize),
    /// Drop the cached artifact and extract the document again.
    Refresh,
}

/// Dialogs with fixed wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    Sleep,
    Shutdown,
}

/// What the display layer should draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderPayload {
    Page {
        lines: Vec<String>,
        /// 1-based.
        page_number: usize,
        total_pages: usize,
        /// `false` while only the quick-pass pages are known.
        complete: bool,
    },
    Menu {
        title: String,
        items: Vec<String>,
        selected: usize,
    },
    Chapters {
        chapters: Vec<Chapter>,
        selected: usize,
    },
    Confirmation {
        title: String,
        message: String,
        options: Vec<String>,
    },
}

impl RenderPayload {
    fn menu(title: &str, items: &[&str], selected: usize) -> Self {
        RenderPayload::Menu {
            title: title.to_string(),
            items: items.iter().map(|s| s.to_string()).collect(),
            selected: selected.min(items.len().saturating_sub(1)),
        }
    }

    fn confirmation(title: &str, message: &str, options: &[&str]) -> Self {
        RenderPayload::Confirmation {
            title: title.to_string(),
            message: message.to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn main_menu(selected: usize) -> Self {
        Self::menu("MAIN MENU", MAIN_MENU, selected)
    }

    pub fn jump_menu(selected: usize) -> Self {
        Self::menu("JUMP PAGES", JUMP_MENU, selected)
    }

    pub fn confirm(kind: Confirm) -> Self {
        match kind {
            Confirm::Sleep => Self::confirmation("SLEEP", "Put display to sleep?", &["Sleep Now", "Cancel"]),
            Confirm::Shutdown => {
                Self::confirmation("SHUTDOWN", "Shutdown the e-reader?", &["Shutdown Now", "Cancel"])
            }
        }
    }
}

struct ActiveDocument {
    identity: DocumentIdentity,
    artifact: Arc<CachedArtifact>,
    state: CacheState,
    /// 0-based, always `< artifact.page_count()`.
    page: usize,
}

impl ActiveDocument {
    fn last_page(&self) -> usize {
        self.artifact.page_count().saturating_sub(1)
    }
}

/// Foreground state of the reader.
pub struct ReaderSession {
    pipeline: ExtractionPipeline,
    completions: CompletionChannel,
    bookmarks: BookmarkStore,
    library: Library,
    active: Option<ActiveDocument>,
    /// Full passes started by this session and not yet consumed.
    in_flight: HashMap<Fingerprint, BackgroundJob>,
}

impl ReaderSession {
    /// Session reading EPUB files. Must be created inside a Tokio runtime.
    pub fn new(config: ReaderConfig) -> Self {
        Self::with_opener(config, Arc::new(EpubOpener))
    }

    pub fn with_opener(config: ReaderConfig, opener: Arc<dyn SourceOpener>) -> Self {
        let completions = CompletionChannel::new();
        let bookmarks = BookmarkStore::new(config.bookmark_dir.clone(), config.bookmark_memory);
        let library = Library::new(config.books_dir.clone(), config.bookmark_dir.clone());
        let pipeline = ExtractionPipeline::with_opener(config, opener, completions.sender());
        Self {
            pipeline,
            completions,
            bookmarks,
            library,
            active: None,
            in_flight: HashMap::new(),
        }
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn pipeline(&self) -> &ExtractionPipeline {
        &self.pipeline
    }

    pub fn identity(&self) -> Option<&DocumentIdentity> {
        self.active.as_ref().map(|a| &a.identity)
    }

    pub fn artifact(&self) -> Option<&Arc<CachedArtifact>> {
        self.active.as_ref().map(|a| &a.artifact)
    }

    /// Cache state of the open document as this session last saw it.
    pub fn state(&self) -> CacheState {
        self.active
            .as_ref()
            .map(|a| a.state)
            .unwrap_or(CacheState::Uncached)
    }

    /// 1-based number of the page on screen.
    pub fn page_number(&self) -> Option<usize> {
        self.active.as_ref().map(|a| a.page + 1)
    }

    pub fn page_count(&self) -> usize {
        self.active
            .as_ref()
            .map(|a| a.artifact.page_count())
            .unwrap_or(0)
    }

    /// Whether a full pass for the open document is still running.
    pub fn is_extracting(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|a| self.in_flight.get(&a.identity.fingerprint))
            .is_some_and(|job| !job.is_finished())
    }

    /// Open `path` at its saved page.
    pub async fn open(&mut self, path: &Path) -> RenderPayload {
        let prepared = self.pipeline.prepare(path).await;
        self.start_full_pass(&prepared);

        let saved = self.bookmarks.load(&prepared.identity);
        let page = clamp_page(saved, prepared.artifact.page_count());

        if prepared.needs_full_pass || prepared.initial_state == CacheState::FullReady {
            // Creates the bookmark on first open, refreshes its timestamp after.
            self.bookmarks.save_async(&prepared.identity, page as u32 + 1);
            if let Err(e) = self.library.save_last_book(path) {
                warn!("{e}");
            }
        }

        info!(
            "Reading {} at page {}/{} ({:?})",
            prepared.identity.display_name(),
            page + 1,
            prepared.artifact.page_count(),
            prepared.initial_state
        );

        self.active = Some(ActiveDocument {
            state: if prepared.artifact.is_full() {
                CacheState::FullReady
            } else {
                CacheState::PartialReady
            },
            identity: prepared.identity,
            artifact: prepared.artifact,
            page,
        });
        self.render()
    }

    /// Open the last book read, or the newest one in the library.
    pub async fn open_last(&mut self) -> Option<RenderPayload> {
        let path = self.library.last_book()?;
        Some(self.open(&path).await)
    }

    /// Start a full pass unless this session already has one running for
    /// the same document version.
    fn start_full_pass(&mut self, prepared: &Prepared) {
        self.in_flight.retain(|_, job| !job.is_finished());
        if self.in_flight.contains_key(&prepared.identity.fingerprint) {
            debug!(
                "Full pass for {} already running",
                prepared.identity.display_name()
            );
            return;
        }
        if let Some(job) = self.pipeline.spawn_full_pass(prepared) {
            self.in_flight.insert(prepared.identity.fingerprint.clone(), job);
        }
    }

    /// Apply one input event and return what to draw.
    pub async fn handle(&mut self, event: ReaderEvent) -> RenderPayload {
        match event {
            ReaderEvent::Turn(delta) => {
                if let Some(doc) = self.active.as_mut() {
                    let target = (doc.page as i64).saturating_add(delta);
                    doc.page = target.clamp(0, doc.last_page() as i64) as usize;
                    self.bookmarks.save_async(&doc.identity, doc.page as u32 + 1);
                }
            }
            ReaderEvent::SelectChapter(index) => {
                if let Some(doc) = self.active.as_mut() {
                    let count = doc.artifact.chapters.len();
                    if index < count {
                        doc.page = estimate_page(index, count, doc.artifact.page_count());
                        self.bookmarks.save_async(&doc.identity, doc.page as u32 + 1);
                    }
                }
            }
            ReaderEvent::Refresh => self.refresh().await,
        }
        self.render()
    }

    async fn refresh(&mut self) {
        let Some(doc) = self.active.take() else {
            return;
        };
        info!("Refreshing {}", doc.identity.display_name());
        if let Err(e) = self.pipeline.cache().invalidate(&doc.identity) {
            warn!("{e}");
        }
        self.bookmarks.save_async(&doc.identity, 1);
        let path: PathBuf = doc.identity.path.clone();
        self.open(&path).await;
    }

    /// Consume pending completions. Returns `true` if the open document was
    /// upgraded to its full page list.
    pub fn poll_completion(&mut self) -> bool {
        let mut upgraded = false;
        while let Some(completion) = self.completions.try_next() {
            upgraded |= self.apply(completion);
        }
        upgraded
    }

    /// Wait for the open document's full pass, at most `limit` if given.
    /// Returns `true` once the full page list is active.
    pub async fn wait_for_full(&mut self, limit: Option<Duration>) -> bool {
        let wait = async {
            loop {
                if self.state() == CacheState::FullReady {
                    return true;
                }
                if !self.is_extracting() {
                    self.poll_completion();
                    return self.state() == CacheState::FullReady;
                }
                // A failed pass publishes nothing, so keep checking the job.
                match tokio::time::timeout(COMPLETION_POLL, self.completions.next()).await {
                    Ok(Some(completion)) => {
                        self.apply(completion);
                    }
                    Ok(None) => return false,
                    Err(_) => {}
                }
            }
        };
        match limit {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or(false),
            None => wait.await,
        }
    }

    fn apply(&mut self, completion: Completion) -> bool {
        self.in_flight.remove(&completion.identity.fingerprint);
        let Some(doc) = self.active.as_mut() else {
            return false;
        };
        if doc.identity != completion.identity {
            debug!(
                "Discarding completion for {}; {} is open",
                completion.identity.display_name(),
                doc.identity.display_name()
            );
            return false;
        }

        doc.artifact = completion.artifact;
        doc.state = CacheState::FullReady;
        doc.page = doc.page.min(doc.last_page());
        info!(
            "Full pass ready: {} pages, staying on page {}",
            doc.artifact.page_count(),
            doc.page + 1
        );
        true
    }

    /// The page on screen, or a notice when no book is open.
    pub fn render(&self) -> RenderPayload {
        match &self.active {
            Some(doc) => RenderPayload::Page {
                lines: doc
                    .artifact
                    .pages
                    .get(doc.page)
                    .map(|p| p.lines.clone())
                    .unwrap_or_default(),
                page_number: doc.page + 1,
                total_pages: doc.artifact.page_count(),
                complete: doc.state == CacheState::FullReady,
            },
            None => RenderPayload::Confirmation {
                title: "NO BOOKS".into(),
                message: format!(
                    "No books found!\n\nPlease add EPUB files to:\n{}",
                    self.library.books_dir().display()
                ),
                options: vec!["OK".into()],
            },
        }
    }

    /// Chapter list with page estimates, or a notice when there is none.
    pub fn chapter_payload(&self, selected: usize) -> RenderPayload {
        match &self.active {
            Some(doc) if !doc.artifact.chapters.is_empty() => RenderPayload::Chapters {
                chapters: with_page_estimates(&doc.artifact.chapters, doc.artifact.page_count()),
                selected: selected.min(doc.artifact.chapters.len() - 1),
            },
            _ => RenderPayload::confirmation("NO CHAPTERS", "No chapters found\nin this book.", &["OK"]),
        }
    }

    /// Save the current position and wait up to `grace` for it to land.
    /// Returns `false` if pending bookmark writes did not finish in time.
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        if let Some(doc) = &self.active {
            self.bookmarks.save_async(&doc.identity, doc.page as u32 + 1);
        }
        let flushed = self.bookmarks.flush(grace).await;
        if !flushed {
            warn!("Bookmark writes still pending after {}ms", grace.as_millis());
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReaderError;
    use crate::pipeline::layout::MonospaceMetrics;
    use crate::source::{DocumentSource, MemorySource};
    use tempfile::TempDir;

    fn book(items: usize) -> MemorySource {
        let mut source = MemorySource::new().with_toc(["One", "Two", "Three", "Four", "Five"]);
        for i in 0..items {
            source = source.with_item(
                format!("c{i}.xhtml"),
                format!("<p>{}</p>", vec!["lorem"; 400].join(" ")),
            );
        }
        source
    }

    fn session(dir: &TempDir, source: MemorySource) -> ReaderSession {
        let config = ReaderConfig::builder()
            .cache_dir(dir.path().join("cache"))
            .bookmark_dir(dir.path().join("state"))
            .books_dir(dir.path())
            .metrics(Arc::new(MonospaceMetrics::new(9.0, 19.0)))
            .build()
            .unwrap();
        let opener = move |_: &DocumentIdentity| -> Result<Box<dyn DocumentSource>, ReaderError> {
            Ok(Box::new(source.clone()))
        };
        ReaderSession::with_opener(config, Arc::new(opener))
    }

    fn page_number(payload: &RenderPayload) -> usize {
        match payload {
            RenderPayload::Page { page_number, .. } => *page_number,
            other => panic!("expected a page, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn turn_clamps_to_bounds() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, book(3));
        s.open(&dir.path().join("b.epub")).await;
        assert_eq!(page_number(&s.handle(ReaderEvent::Turn(-10)).await), 1);
        let last = s.page_count();
        assert_eq!(page_number(&s.handle(ReaderEvent::Turn(10_000)).await), last);
    }

    #[tokio::test]
    async fn position_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b.epub");
        let mut s = session(&dir, book(3));
        s.open(&path).await;
        s.handle(ReaderEvent::Turn(4)).await;
        assert!(s.shutdown(Duration::from_secs(5)).await);

        let mut again = session(&dir, book(3));
        assert_eq!(page_number(&again.open(&path).await), 5);
    }

    #[tokio::test]
    async fn completion_upgrades_without_moving() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, book(60));
        s.open(&dir.path().join("b.epub")).await;
        assert_eq!(s.state(), CacheState::PartialReady);
        s.handle(ReaderEvent::Turn(7)).await;

        assert!(s.wait_for_full(Some(Duration::from_secs(30))).await);
        assert_eq!(s.state(), CacheState::FullReady);
        assert_eq!(s.page_number(), Some(8));
        assert!(!s.is_extracting());
    }

    #[tokio::test]
    async fn completion_for_other_book_is_discarded() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, book(60));
        s.open(&dir.path().join("first.epub")).await;
        // Switch before the first book's full pass is consumed.
        std::fs::write(dir.path().join("second.epub"), b"xx").unwrap();
        s.open(&dir.path().join("second.epub")).await;
        let second = s.identity().cloned().unwrap();

        assert!(s.wait_for_full(Some(Duration::from_secs(30))).await);
        assert_eq!(s.identity(), Some(&second));
    }

    #[tokio::test]
    async fn select_chapter_uses_estimate() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, book(10));
        s.open(&dir.path().join("b.epub")).await;
        s.wait_for_full(Some(Duration::from_secs(30))).await;
        let total = s.page_count();
        let payload = s.handle(ReaderEvent::SelectChapter(2)).await;
        assert_eq!(page_number(&payload), estimate_page(2, 5, total) + 1);
        // Out-of-range selections are ignored.
        let payload = s.handle(ReaderEvent::SelectChapter(99)).await;
        assert_eq!(page_number(&payload), estimate_page(2, 5, total) + 1);
    }

    #[tokio::test]
    async fn refresh_returns_to_first_page() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, book(5));
        s.open(&dir.path().join("b.epub")).await;
        s.wait_for_full(Some(Duration::from_secs(30))).await;
        s.handle(ReaderEvent::Turn(3)).await;

        let payload = s.handle(ReaderEvent::Refresh).await;
        assert_eq!(page_number(&payload), 1);
        assert_eq!(s.state(), CacheState::PartialReady);
    }

    #[tokio::test]
    async fn payloads_without_book() {
        let dir = TempDir::new().unwrap();
        let s = session(&dir, book(1));
        assert!(matches!(s.render(), RenderPayload::Confirmation { ref title, .. } if title == "NO BOOKS"));
        assert!(matches!(s.chapter_payload(0), RenderPayload::Confirmation { ref title, .. } if title == "NO CHAPTERS"));
    }

    #[tokio::test]
    async fn chapter_payload_lists_estimates() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, book(4));
        s.open(&dir.path().join("b.epub")).await;
        match s.chapter_payload(99) {
            RenderPayload::Chapters { chapters, selected } => {
                assert_eq!(chapters.len(), 5);
                assert_eq!(selected, 4);
                assert_eq!(chapters[0].page_index, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn menus_match_device_wording() {
        match RenderPayload::main_menu(0) {
            RenderPayload::Menu { title, items, .. } => {
                assert_eq!(title, "MAIN MENU");
                assert_eq!(items.len(), 7);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(jump_delta(0), Some(5));
        assert_eq!(jump_delta(7), Some(-100));
        assert_eq!(jump_delta(8), None);
        assert!(matches!(
            RenderPayload::confirm(Confirm::Shutdown),
            RenderPayload::Confirmation { ref options, .. } if options[0] == "Shutdown Now"
        ));
    }

    #[test]
    fn page_payload_serialises_with_kind_tag() {
        let payload = RenderPayload::Page {
            lines: vec!["a".into()],
            page_number: 1,
            total_pages: 1,
            complete: true,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "page");
        assert_eq!(json["page_number"], 1);
    }

    #[tokio::test]
    async fn first_open_creates_bookmark() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b.epub");
        std::fs::write(&path, b"xx").unwrap();
        let mut s = session(&dir, book(3));
        s.open(&path).await;
        assert!(s.bookmarks.flush(Duration::from_secs(5)).await);

        let identity = s.identity().cloned().unwrap();
        let record = s.bookmarks.record_path(&identity.fingerprint);
        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(record).unwrap()).unwrap();
        assert_eq!(json["pageNumber"], 1);
    }
}
