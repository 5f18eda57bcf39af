//! Configuration types for opening and paginating books.
//!
//! Every knob lives in [`ReaderConfig`], built via its [`ReaderConfigBuilder`].
//! Geometry and metrics must be identical between the quick pass and the full
//! pass of one book, so the pipeline clones a single config into both.

use crate::error::ReaderError;
use crate::pipeline::chapters::ChapterLimits;
use crate::pipeline::layout::{MonospaceMetrics, PageGeometry, TextMeasure};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a reader session and its extraction pipeline.
///
/// Built via [`ReaderConfig::builder()`] or using [`ReaderConfig::default()`].
///
/// # Example
/// ```rust
/// use inkpage::ReaderConfig;
///
/// let config = ReaderConfig::builder()
///     .page_size(300.0, 400.0)
///     .margin(4.0)
///     .quick_word_target(5_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ReaderConfig {
    /// Display size and margin, in the same unit as the metrics. Default: 300×400, margin 4.
    pub geometry: PageGeometry,

    /// Text measurement used by the paginator. Default: [`MonospaceMetrics::default()`].
    ///
    /// Quick-pass and full-pass layouts only agree on their shared prefix
    /// when both use the same metrics.
    pub metrics: Arc<dyn TextMeasure>,

    /// Caps for the quick pass.
    pub quick_pass: QuickPassLimits,

    /// Chapter detection limits.
    pub chapters: ChapterLimits,

    /// Directory holding compressed cache records.
    pub cache_dir: PathBuf,

    /// Directory holding bookmark records and the last-opened-book file.
    pub bookmark_dir: PathBuf,

    /// Directory scanned for books.
    pub books_dir: PathBuf,

    /// Number of recent bookmark values kept in memory. Default: 64.
    pub bookmark_memory: usize,

    /// How long shutdown waits for pending bookmark writes. Default: 500 ms.
    pub shutdown_grace_ms: u64,

    /// Optional observer for quick/full pass progress.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            geometry: PageGeometry::default(),
            metrics: Arc::new(MonospaceMetrics::default()),
            quick_pass: QuickPassLimits::default(),
            chapters: ChapterLimits::default(),
            cache_dir: default_cache_dir(),
            bookmark_dir: default_bookmark_dir(),
            books_dir: default_books_dir(),
            bookmark_memory: 64,
            shutdown_grace_ms: 500,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ReaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderConfig")
            .field("geometry", &self.geometry)
            .field("metrics", &"<dyn TextMeasure>")
            .field("quick_pass", &self.quick_pass)
            .field("chapters", &self.chapters)
            .field("cache_dir", &self.cache_dir)
            .field("bookmark_dir", &self.bookmark_dir)
            .field("books_dir", &self.books_dir)
            .field("bookmark_memory", &self.bookmark_memory)
            .field("shutdown_grace_ms", &self.shutdown_grace_ms)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ReaderConfig {
    /// Create a new builder for `ReaderConfig`.
    pub fn builder() -> ReaderConfigBuilder {
        ReaderConfigBuilder {
            config: Self::default(),
        }
    }

    /// Shutdown grace period as a `Duration`.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Builder for [`ReaderConfig`].
#[derive(Debug)]
pub struct ReaderConfigBuilder {
    config: ReaderConfig,
}

impl ReaderConfigBuilder {
    pub fn page_size(mut self, width: f32, height: f32) -> Self {
        self.config.geometry.width = width;
        self.config.geometry.height = height;
        self
    }

    pub fn margin(mut self, margin: f32) -> Self {
        self.config.geometry.margin = margin.max(0.0);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn TextMeasure>) -> Self {
        self.config.metrics = metrics;
        self
    }

    pub fn quick_word_target(mut self, words: usize) -> Self {
        self.config.quick_pass.word_target = words;
        self
    }

    pub fn quick_item_cap(mut self, items: usize) -> Self {
        self.config.quick_pass.item_cap = items;
        self
    }

    pub fn quick_page_cap(mut self, pages: usize) -> Self {
        self.config.quick_pass.page_cap = pages;
        self
    }

    pub fn max_chapters(mut self, n: usize) -> Self {
        self.config.chapters.max_chapters = n;
        self
    }

    pub fn toc_min_titles(mut self, n: usize) -> Self {
        self.config.chapters.toc_min_titles = n;
        self
    }

    pub fn max_title_chars(mut self, n: usize) -> Self {
        self.config.chapters.max_title_chars = n;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn bookmark_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.bookmark_dir = dir.into();
        self
    }

    pub fn books_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.books_dir = dir.into();
        self
    }

    pub fn bookmark_memory(mut self, n: usize) -> Self {
        self.config.bookmark_memory = n.max(1);
        self
    }

    pub fn shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_grace_ms = ms;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ReaderConfig, ReaderError> {
        let c = &self.config;
        let g = &c.geometry;
        if g.usable_width() <= 0.0 {
            return Err(ReaderError::InvalidConfig(format!(
                "page width {} leaves no room inside margin {}",
                g.width, g.margin
            )));
        }
        if g.height - 2.0 * g.margin <= 0.0 {
            return Err(ReaderError::InvalidConfig(format!(
                "page height {} leaves no room inside margin {}",
                g.height, g.margin
            )));
        }
        if c.metrics.line_height() <= 0.0 {
            return Err(ReaderError::InvalidConfig(
                "line height must be positive".into(),
            ));
        }
        if c.quick_pass.item_cap == 0 || c.quick_pass.page_cap == 0 {
            return Err(ReaderError::InvalidConfig(
                "quick-pass item and page caps must be ≥ 1".into(),
            ));
        }
        if c.chapters.max_chapters == 0 {
            return Err(ReaderError::InvalidConfig(
                "chapter limit must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Quick pass ───────────────────────────────────────────────────────────

/// Bounds that keep the quick pass fast on very large books.
///
/// The quick pass stops reading items once either `word_target` words or
/// `item_cap` items have been read, and lays out at most `page_cap` pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickPassLimits {
    /// Default: 10,000 (roughly 40–50 pages on a 300×400 display).
    pub word_target: usize,
    /// Default: 30.
    pub item_cap: usize,
    /// Default: 50.
    pub page_cap: usize,
}

impl Default for QuickPassLimits {
    fn default() -> Self {
        Self {
            word_target: 10_000,
            item_cap: 30,
            page_cap: 50,
        }
    }
}

// ── Default directories ──────────────────────────────────────────────────

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("inkpage")
}

fn default_bookmark_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("inkpage")
}

fn default_books_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("books")
}
