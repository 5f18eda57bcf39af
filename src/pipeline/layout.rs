//! Pagination: greedy word-wrap of normalised text into fixed-size pages.
//!
//! The algorithm is greedy and fully deterministic. The quick
//! pass and the full pass lay out different amounts of the same text, and
//! the reader's saved page is only meaningful if both passes agree on the
//! pages they share.
//!
//! ```text
//! text ──split '\n'──▶ paragraphs ──greedy wrap──▶ lines ──group──▶ pages
//! ```

use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;

/// Line shown on the only page of a document that produced no text.
pub const PLACEHOLDER_LINE: &str = "No readable text in this book.";

/// Fraction of a line height reserved at the bottom of every page for the
/// page-number footer.
const FOOTER_LINES: f32 = 1.5;

/// Measures rendered text. Implemented by the font layer.
pub trait TextMeasure: Send + Sync {
    /// Advance width of `text` when drawn on one line.
    fn measure(&self, text: &str) -> f32;

    /// Vertical distance between two baselines.
    fn line_height(&self) -> f32;
}

/// Fixed-advance metrics: every character is `advance` wide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonospaceMetrics {
    pub advance: f32,
    pub line_height: f32,
}

impl MonospaceMetrics {
    pub fn new(advance: f32, line_height: f32) -> Self {
        Self {
            advance,
            line_height,
        }
    }
}

impl Default for MonospaceMetrics {
    /// Roughly an 18 px book face: 9 px average advance, 19 px line.
    fn default() -> Self {
        Self::new(9.0, 19.0)
    }
}

impl TextMeasure for MonospaceMetrics {
    fn measure(&self, text: &str) -> f32 {
        text.chars().count() as f32 * self.advance
    }

    fn line_height(&self) -> f32 {
        self.line_height
    }
}

/// Display size and margin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            width: 300.0,
            height: 400.0,
            margin: 4.0,
        }
    }
}

impl PageGeometry {
    /// Horizontal space available to one line of text.
    pub fn usable_width(&self) -> f32 {
        self.width - 2.0 * self.margin
    }

    /// Lines that fit above the footer band. Never less than one.
    pub fn max_lines_per_page(&self, line_height: f32) -> usize {
        if line_height <= 0.0 {
            return 1;
        }
        let usable = self.height - 2.0 * self.margin - FOOTER_LINES * line_height;
        ((usable / line_height).floor() as usize).max(1)
    }
}

/// One screen of pre-wrapped lines. A blank string is a paragraph break.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Page {
    pub lines: Vec<String>,
}

impl Page {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// A page carrying a single line of text.
    pub fn single(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
        }
    }

    pub fn placeholder() -> Self {
        Self::single(PLACEHOLDER_LINE)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Lay out the whole of `text`.
///
/// Always returns at least one page.
pub fn layout(text: &str, geometry: &PageGeometry, metrics: &dyn TextMeasure) -> Vec<Page> {
    paginate(text, geometry, metrics, None)
}

/// Lay out `text` until `max_lines` lines have been emitted, then finish the
/// page in progress and stop.
///
/// The pages returned are identical to the leading pages of [`layout`] on
/// the same text, except that the last one is only guaranteed to match when
/// it is full.
pub fn layout_bounded(
    text: &str,
    geometry: &PageGeometry,
    metrics: &dyn TextMeasure,
    max_lines: usize,
) -> Vec<Page> {
    paginate(text, geometry, metrics, Some(max_lines))
}

fn paginate(
    text: &str,
    geometry: &PageGeometry,
    metrics: &dyn TextMeasure,
    budget: Option<usize>,
) -> Vec<Page> {
    let mut sink = PageSink::new(geometry.max_lines_per_page(metrics.line_height()), budget);
    let width = geometry.usable_width();
    // Shared-across-pages state for the blank-line rule.
    let mut wrote_any = false;
    let mut last_blank = false;

    'paragraphs: for para in text.split('\n') {
        let para = para.trim();
        if para.is_empty() {
            if wrote_any && !last_blank {
                last_blank = true;
                if sink.push(String::new()).is_break() {
                    break 'paragraphs;
                }
            }
            continue;
        }

        let mut current = String::new();
        for word in para.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                let mut c = String::with_capacity(current.len() + 1 + word.len());
                c.push_str(&current);
                c.push(' ');
                c.push_str(word);
                c
            };

            if metrics.measure(&candidate) <= width {
                current = candidate;
            } else {
                if !current.is_empty() {
                    wrote_any = true;
                    last_blank = false;
                    if sink.push(std::mem::take(&mut current)).is_break() {
                        break 'paragraphs;
                    }
                }
                current = word.to_string();
            }
        }

        if !current.is_empty() {
            wrote_any = true;
            last_blank = false;
            if sink.push(current).is_break() {
                break 'paragraphs;
            }
        }
    }

    sink.finish()
}

/// Groups a stream of lines into pages.
struct PageSink {
    pages: Vec<Page>,
    current: Vec<String>,
    max_lines: usize,
    emitted: usize,
    budget: Option<usize>,
}

impl PageSink {
    fn new(max_lines: usize, budget: Option<usize>) -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::with_capacity(max_lines),
            max_lines,
            emitted: 0,
            budget,
        }
    }

    fn push(&mut self, line: String) -> ControlFlow<()> {
        self.emitted += 1;
        if self.current.len() >= self.max_lines {
            self.flush();
            // A paragraph break never opens a page.
            if line.is_empty() {
                return self.check_budget();
            }
        }
        self.current.push(line);
        self.check_budget()
    }

    fn check_budget(&self) -> ControlFlow<()> {
        match self.budget {
            Some(budget) if self.emitted >= budget && self.current.len() >= self.max_lines => {
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(()),
        }
    }

    fn flush(&mut self) {
        let mut lines = std::mem::replace(&mut self.current, Vec::with_capacity(self.max_lines));
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        if !lines.is_empty() {
            self.pages.push(Page::new(lines));
        }
    }

    fn finish(mut self) -> Vec<Page> {
        self.flush();
        if self.pages.is_empty() {
            self.pages.push(Page::placeholder());
        }
        self.pages
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
