//! Two-phase extraction: a bounded quick pass the reader sees at once, then
//! a full pass on the background worker.
//!
//! ## Why two passes?
//!
//! Decompressing, stripping and laying out a long novel takes seconds on the
//! small boards e-paper readers run on. The quick pass reads only the first
//! items, enough for a few dozen pages, and stores them as a Partial
//! artifact. The full pass then redoes the work for the whole document and
//! replaces the Partial record with a Full one. Because layout is
//! deterministic, the pages the reader already saw keep their numbers.
//!
//! ```text
//!              ┌─ Full cached ────────────────────────────▶ done
//! prepare ─────┼─ Partial cached ───────────────┐
//!              └─ nothing ──▶ quick pass ─store─┴─▶ spawn_full_pass ──▶ completion
//! ```

use crate::cache::{CacheState, CacheStore, CachedArtifact, Completeness};
use crate::config::ReaderConfig;
use crate::error::ReaderError;
use crate::identity::DocumentIdentity;
use crate::pipeline::{chapters, layout, normalize};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::source::{DocumentSource, EpubOpener, SourceOpener};
use crate::worker::{BackgroundJob, BackgroundWorker, CompletionSender};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of [`ExtractionPipeline::prepare`]: what to show right now.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub identity: DocumentIdentity,
    pub artifact: Arc<CachedArtifact>,
    /// Cache state found on open, before any pass ran.
    pub initial_state: CacheState,
    /// `true` when a full pass should follow.
    pub needs_full_pass: bool,
}

/// Quick/full extraction over the cache, a document opener and the worker.
#[derive(Clone)]
pub struct ExtractionPipeline {
    config: Arc<ReaderConfig>,
    cache: CacheStore,
    opener: Arc<dyn SourceOpener>,
    worker: BackgroundWorker,
}

impl ExtractionPipeline {
    /// Pipeline reading EPUB files from disk.
    pub fn new(config: ReaderConfig, completions: CompletionSender) -> Self {
        Self::with_opener(config, Arc::new(EpubOpener), completions)
    }

    pub fn with_opener(
        config: ReaderConfig,
        opener: Arc<dyn SourceOpener>,
        completions: CompletionSender,
    ) -> Self {
        let cache = CacheStore::new(config.cache_dir.clone());
        Self {
            config: Arc::new(config),
            cache,
            opener,
            worker: BackgroundWorker::new(completions),
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Prepare `path` and launch its full pass if one is needed.
    pub async fn open(&self, path: &Path) -> (Prepared, Option<BackgroundJob>) {
        let prepared = self.prepare(path).await;
        let job = self.spawn_full_pass(&prepared);
        (prepared, job)
    }

    /// Cache lookup, then the quick pass if nothing usable was cached.
    ///
    /// Never fails: an unreadable document yields a one-page artifact
    /// explaining why.
    pub async fn prepare(&self, path: &Path) -> Prepared {
        let path = path.to_path_buf();
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.prepare_blocking(&path)).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let err = ReaderError::Internal(format!("quick pass panicked: {e}"));
                warn!("{err}");
                Prepared {
                    identity: DocumentIdentity::new("", 0, 0, 0),
                    artifact: Arc::new(CachedArtifact::degraded(err.reader_message())),
                    initial_state: CacheState::Uncached,
                    needs_full_pass: false,
                }
            }
        }
    }

    fn prepare_blocking(&self, path: &Path) -> Prepared {
        let identity = DocumentIdentity::of(path);
        info!("Opening {}", identity.display_name());

        // ── Step 1: Cache lookup ─────────────────────────────────────────
        if let Some(artifact) = self.cache.load(&identity) {
            let state = CacheState::from(artifact.completeness);
            debug!("Cache hit ({state:?}) for {}", identity.display_name());
            return Prepared {
                identity,
                needs_full_pass: !artifact.is_full(),
                artifact: Arc::new(artifact),
                initial_state: state,
            };
        }

        // ── Step 2: Open the container ───────────────────────────────────
        let source = match self.opener.open(&identity) {
            Ok(source) => source,
            Err(e) => {
                warn!("Cannot open {}: {e}", identity.display_name());
                return Prepared {
                    identity,
                    artifact: Arc::new(CachedArtifact::degraded(e.reader_message())),
                    initial_state: CacheState::Uncached,
                    needs_full_pass: false,
                };
            }
        };

        // ── Step 3: Quick pass ───────────────────────────────────────────
        let (artifact, items_read) = quick_pass(source.as_ref(), &self.config);
        if let Err(e) = self.cache.store(&identity, &artifact) {
            warn!("Partial artifact not cached: {e}");
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_quick_pass_complete(items_read, artifact.page_count());
        }

        Prepared {
            identity,
            artifact: Arc::new(artifact),
            initial_state: CacheState::Uncached,
            needs_full_pass: true,
        }
    }

    /// Launch the full pass for `prepared` on the background worker.
    ///
    /// Returns `None` when the document needs none (Full cached or
    /// unreadable). Each call starts a new job; callers that may open the
    /// same document twice coalesce on their side.
    pub fn spawn_full_pass(&self, prepared: &Prepared) -> Option<BackgroundJob> {
        if !prepared.needs_full_pass {
            return None;
        }
        let identity = prepared.identity.clone();
        let chapters = prepared.artifact.chapters.clone();
        let config = Arc::clone(&self.config);
        let cache = self.cache.clone();
        let opener = Arc::clone(&self.opener);

        let job_identity = identity.clone();
        Some(self.worker.spawn(identity, move || {
            let source = opener.open(&job_identity)?;
            let artifact = full_pass(source.as_ref(), &config, chapters);
            cache.store(&job_identity, &artifact)?;
            if let Some(ref cb) = config.progress_callback {
                cb.on_full_pass_complete(artifact.page_count());
            }
            Ok(Arc::new(artifact))
        }))
    }
}

/// Join item texts the same way in both passes so their layouts agree.
fn join_items(texts: &[String]) -> String {
    texts.join("\n\n")
}

/// Read items until either quick-pass cap is hit, then lay out a bounded
/// number of pages. Returns the Partial artifact and the items read.
pub fn quick_pass(source: &dyn DocumentSource, config: &ReaderConfig) -> (CachedArtifact, usize) {
    let start = Instant::now();
    let limits = &config.quick_pass;
    let mut texts = Vec::new();
    let mut words = 0usize;
    let mut items_read = 0usize;

    for index in 0..source.item_count() {
        if words >= limits.word_target || items_read >= limits.item_cap {
            break;
        }
        items_read += 1;
        match source.item(index) {
            Ok(item) => {
                let text = item.plain_text();
                words += text.split_whitespace().count();
                if !text.is_empty() {
                    texts.push(text);
                }
            }
            Err(e) => debug!("Quick pass skipping {e}"),
        }
    }

    let text = normalize::normalize(&join_items(&texts));
    let titles = chapters::detect(source, &config.chapters);
    let lines_per_page = config
        .geometry
        .max_lines_per_page(config.metrics.line_height());
    let max_lines = limits.page_cap.saturating_mul(lines_per_page);
    let pages = layout::layout_bounded(&text, &config.geometry, config.metrics.as_ref(), max_lines);

    info!(
        "Quick pass: {} items, {} words, {} pages, {} chapters in {}ms",
        items_read,
        words,
        pages.len(),
        titles.len(),
        start.elapsed().as_millis()
    );

    (
        CachedArtifact::new(text, pages, titles, Completeness::Partial),
        items_read,
    )
}

/// Extract, normalise and lay out every item. `chapters` from the quick pass
/// are kept as they are.
pub fn full_pass(source: &dyn DocumentSource, config: &ReaderConfig, chapters: Vec<String>) -> CachedArtifact {
    let start = Instant::now();
    let progress: ProgressCallback = config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback));

    let total = source.item_count();
    progress.on_full_pass_start(total);

    let mut texts = Vec::with_capacity(total);
    let mut failed = 0usize;
    for index in 0..total {
        match source.item(index) {
            Ok(item) => {
                let text = item.plain_text();
                if !text.is_empty() {
                    texts.push(text);
                }
            }
            Err(e) => {
                warn!("Full pass skipping {e}");
                progress.on_item_error(index, &e.to_string());
                failed += 1;
            }
        }
        progress.on_item_processed(index + 1, total);
    }

    let text = normalize::normalize(&join_items(&texts));
    let pages = layout::layout(&text, &config.geometry, config.metrics.as_ref());

    info!(
        "Full pass: {}/{} items, {} pages in {}ms",
        total - failed,
        total,
        pages.len(),
        start.elapsed().as_millis()
    );

    CachedArtifact::new(text, pages, chapters, Completeness::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::layout::MonospaceMetrics;
    use crate::source::MemorySource;
    use crate::worker::{CompletionChannel, JobOutcome};
    use tempfile::TempDir;

    fn paragraph(n: usize, tag: &str) -> String {
        format!("<p>{}</p>", vec![tag; n].join(" "))
    }

    /// 40 items of 500 words each.
    fn big_source() -> MemorySource {
        let mut source = MemorySource::new();
        for i in 0..40 {
            let body = format!("<h1>Chapter {i}</h1>{}", paragraph(500, "word"));
            source = source.with_item(format!("c{i}.xhtml"), body);
        }
        source
    }

    fn config(dir: &TempDir) -> ReaderConfig {
        ReaderConfig::builder()
            .cache_dir(dir.path().join("cache"))
            .bookmark_dir(dir.path().join("marks"))
            .metrics(Arc::new(MonospaceMetrics::new(6.0, 19.0)))
            .build()
            .unwrap()
    }

    fn pipeline_for(source: MemorySource, config: ReaderConfig, channel: &CompletionChannel) -> ExtractionPipeline {
        let opener = move |_: &DocumentIdentity| -> Result<Box<dyn DocumentSource>, ReaderError> {
            Ok(Box::new(source.clone()))
        };
        ExtractionPipeline::with_opener(config, Arc::new(opener), channel.sender())
    }

    #[test]
    fn quick_pass_stops_at_word_target() {
        let dir = TempDir::new().unwrap();
        let cfg = ReaderConfig::builder()
            .cache_dir(dir.path())
            .quick_word_target(1_200)
            .build()
            .unwrap();
        let (artifact, items) = quick_pass(&big_source(), &cfg);
        // 502 words per item: the third item crosses 1,200.
        assert_eq!(items, 3);
        assert_eq!(artifact.completeness, Completeness::Partial);
        assert_eq!(artifact.chapters.len(), 20);
    }

    #[test]
    fn quick_pass_stops_at_item_cap() {
        let dir = TempDir::new().unwrap();
        let cfg = ReaderConfig::builder()
            .cache_dir(dir.path())
            .quick_item_cap(2)
            .build()
            .unwrap();
        let (_, items) = quick_pass(&big_source(), &cfg);
        assert_eq!(items, 2);
    }

    #[test]
    fn quick_pass_page_cap_bounds_layout() {
        let dir = TempDir::new().unwrap();
        let cfg = ReaderConfig::builder()
            .cache_dir(dir.path())
            .quick_page_cap(3)
            .build()
            .unwrap();
        let (artifact, _) = quick_pass(&big_source(), &cfg);
        assert_eq!(artifact.page_count(), 3);
    }

    #[test]
    fn full_pass_skips_broken_items_and_keeps_chapters() {
        let dir = TempDir::new().unwrap();
        let source = MemorySource::new()
            .with_item("a.xhtml", "<p>alpha</p>")
            .with_broken_item("b.xhtml")
            .with_item("c.xhtml", "<p>gamma</p>");
        let artifact = full_pass(&source, &config(&dir), vec!["Kept".into()]);
        assert_eq!(artifact.normalized_text, "alpha\n\ngamma");
        assert_eq!(artifact.chapters, vec!["Kept"]);
        assert!(artifact.is_full());
    }

    #[test]
    fn full_pass_layout_extends_quick_pass() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let source = big_source();
        let (quick, _) = quick_pass(&source, &cfg);
        let full = full_pass(&source, &cfg, quick.chapters.clone());
        assert!(full.page_count() > quick.page_count());
        // Every page but the last quick page is a full page and must match.
        let shared = quick.page_count() - 1;
        assert_eq!(quick.pages[..shared], full.pages[..shared]);
    }

    #[tokio::test]
    async fn open_uncached_returns_partial_then_publishes_full() {
        let dir = TempDir::new().unwrap();
        let mut channel = CompletionChannel::new();
        let pipeline = pipeline_for(big_source(), config(&dir), &channel);
        let path = dir.path().join("book.epub");

        let (prepared, job) = pipeline.open(&path).await;
        assert_eq!(prepared.initial_state, CacheState::Uncached);
        assert_eq!(prepared.artifact.completeness, Completeness::Partial);
        assert_eq!(job.unwrap().wait(None).await, Some(JobOutcome::Published));

        let completion = channel.try_next().unwrap();
        assert_eq!(completion.identity, prepared.identity);
        assert!(completion.artifact.is_full());
        assert_eq!(completion.chapters(), prepared.artifact.chapters.as_slice());
        assert_eq!(pipeline.cache().state(&prepared.identity), CacheState::FullReady);
        assert!(channel.try_next().is_none());
    }

    #[tokio::test]
    async fn open_full_cached_runs_no_job() {
        let dir = TempDir::new().unwrap();
        let channel = CompletionChannel::new();
        let pipeline = pipeline_for(big_source(), config(&dir), &channel);
        let path = dir.path().join("book.epub");

        let (_, job) = pipeline.open(&path).await;
        job.unwrap().wait(None).await;

        let (again, job) = pipeline.open(&path).await;
        assert_eq!(again.initial_state, CacheState::FullReady);
        assert!(again.artifact.is_full());
        assert!(job.is_none());
    }

    #[tokio::test]
    async fn open_partial_cached_still_runs_full_pass() {
        let dir = TempDir::new().unwrap();
        let mut channel = CompletionChannel::new();
        let pipeline = pipeline_for(big_source(), config(&dir), &channel);
        let path = dir.path().join("book.epub");

        let first = pipeline.prepare(&path).await;
        let second = pipeline.prepare(&path).await;
        assert_eq!(second.initial_state, CacheState::PartialReady);
        assert_eq!(second.artifact.pages, first.artifact.pages);

        let job = pipeline.spawn_full_pass(&second).unwrap();
        job.wait(None).await;
        assert!(channel.try_next().is_some());
    }

    #[tokio::test]
    async fn container_failure_degrades_without_caching() {
        let dir = TempDir::new().unwrap();
        let channel = CompletionChannel::new();
        let opener = |identity: &DocumentIdentity| -> Result<Box<dyn DocumentSource>, ReaderError> {
            Err(ReaderError::Container {
                path: identity.path.clone(),
                detail: "invalid Zip archive".into(),
            })
        };
        let pipeline = ExtractionPipeline::with_opener(config(&dir), Arc::new(opener), channel.sender());

        let (prepared, job) = pipeline.open(&dir.path().join("bad.epub")).await;
        assert!(job.is_none());
        assert_eq!(prepared.artifact.page_count(), 1);
        assert!(prepared.artifact.pages[0].lines[0].starts_with("Error loading book:"));
        assert_eq!(pipeline.cache().state(&prepared.identity), CacheState::Uncached);
    }

    #[tokio::test]
    async fn missing_file_with_epub_opener_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let channel = CompletionChannel::new();
        let pipeline = ExtractionPipeline::new(config(&dir), channel.sender());
        let (prepared, job) = pipeline.open(&dir.path().join("gone.epub")).await;
        assert!(job.is_none());
        assert_eq!(prepared.artifact.pages[0].lines, vec!["Book not found: gone.epub"]);
    }
}
