//! Chapter discovery.
//!
//! A declared table of contents is preferred. Books whose TOC is missing or
//! too sparse to navigate by get their `h1`–`h3` headings appended.

use crate::source::DocumentSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Bounds on the detected chapter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterLimits {
    /// Hard cap on the list length. Default: 20.
    pub max_chapters: usize,
    /// A TOC with at least this many titles is used without headings. Default: 5.
    pub toc_min_titles: usize,
    /// Headings longer than this many characters are not chapter titles. Default: 100.
    pub max_title_chars: usize,
}

impl Default for ChapterLimits {
    fn default() -> Self {
        Self {
            max_chapters: 20,
            toc_min_titles: 5,
            max_title_chars: 100,
        }
    }
}

/// A chapter title with its approximate first page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    /// Zero-based; `None` when the document has no pages yet.
    pub page_index: Option<usize>,
}

/// Detect the chapter titles of `source`.
///
/// Returns at most `limits.max_chapters` unique titles in document order.
/// Content items that fail to decode are skipped.
pub fn detect(source: &dyn DocumentSource, limits: &ChapterLimits) -> Vec<String> {
    let toc: Vec<String> = source
        .table_of_contents()
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let mut titles = UniqueTitles::new(limits.max_chapters);
    for title in &toc {
        titles.push(title);
    }
    if toc.len() >= limits.toc_min_titles {
        return titles.into_vec();
    }

    for index in 0..source.item_count() {
        if titles.is_full() {
            break;
        }
        let item = match source.item(index) {
            Ok(item) => item,
            Err(e) => {
                debug!("Chapter scan skipping {e}");
                continue;
            }
        };
        for heading in item.headings() {
            if heading.chars().count() <= limits.max_title_chars {
                titles.push(&heading);
            }
        }
    }

    titles.into_vec()
}

/// Proportional page estimate for chapter `chapter_index` of `chapter_count`.
///
/// Always within `0..page_count` (or 0 for an empty document).
pub fn estimate_page(chapter_index: usize, chapter_count: usize, page_count: usize) -> usize {
    if chapter_count == 0 || page_count == 0 {
        return 0;
    }
    let index = chapter_index.min(chapter_count - 1);
    (index * page_count / chapter_count).min(page_count - 1)
}

/// Pair each title with its estimated page.
pub fn with_page_estimates(titles: &[String], page_count: usize) -> Vec<Chapter> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| Chapter {
            title: title.clone(),
            page_index: (page_count > 0).then(|| estimate_page(i, titles.len(), page_count)),
        })
        .collect()
}

/// Insertion-ordered, capped, exact-match deduplication.
struct UniqueTitles {
    seen: HashSet<String>,
    ordered: Vec<String>,
    cap: usize,
}

impl UniqueTitles {
    fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            ordered: Vec::new(),
            cap,
        }
    }

    fn push(&mut self, title: &str) {
        let title = title.trim();
        if title.is_empty() || self.is_full() {
            return;
        }
        if self.seen.insert(title.to_string()) {
            self.ordered.push(title.to_string());
        }
    }

    fn is_full(&self) -> bool {
        self.ordered.len() >= self.cap
    }

    fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn chapter_item(title: &str) -> String {
        format!("<html><body><h1>{title}</h1><p>Body of {title}.</p></body></html>")
    }

    #[test]
    fn test_rich_toc_used_alone() {
        let source = MemorySource::new()
            .with_toc(["One", "Two", "Three", "Four", "Five"])
            .with_item("x.xhtml", chapter_item("Heading Only"));
        let titles = detect(&source, &ChapterLimits::default());
        assert_eq!(titles, vec!["One", "Two", "Three", "Four", "Five"]);
    }

    #[test]
    fn test_sparse_toc_extended_with_headings() {
        let source = MemorySource::new()
            .with_toc(["Preface"])
            .with_item("a.xhtml", chapter_item("Loomings"))
            .with_item("b.xhtml", chapter_item("The Carpet-Bag"));
        let titles = detect(&source, &ChapterLimits::default());
        assert_eq!(titles, vec!["Preface", "Loomings", "The Carpet-Bag"]);
    }

    #[test]
    fn test_duplicates_removed_first_wins() {
        let source = MemorySource::new()
            .with_toc(["Loomings"])
            .with_item("a.xhtml", chapter_item("Loomings"))
            .with_item("b.xhtml", chapter_item("Epilogue"))
            .with_item("c.xhtml", chapter_item("Loomings"));
        let titles = detect(&source, &ChapterLimits::default());
        assert_eq!(titles, vec!["Loomings", "Epilogue"]);
    }

    #[test]
    fn test_long_headings_rejected() {
        let long = "x".repeat(101);
        let exact = "y".repeat(100);
        let source = MemorySource::new()
            .with_item("a.xhtml", chapter_item(&long))
            .with_item("b.xhtml", chapter_item(&exact));
        let titles = detect(&source, &ChapterLimits::default());
        assert_eq!(titles, vec![exact]);
    }

    #[test]
    fn test_capped_at_limit() {
        let mut source = MemorySource::new();
        for i in 0..50 {
            source = source.with_item(format!("c{i}.xhtml"), chapter_item(&format!("Chapter {i}")));
        }
        let titles = detect(&source, &ChapterLimits::default());
        assert_eq!(titles.len(), 20);
        assert_eq!(titles[0], "Chapter 0");
        assert_eq!(titles[19], "Chapter 19");
        let unique: HashSet<_> = titles.iter().collect();
        assert_eq!(unique.len(), titles.len());
    }

    #[test]
    fn test_broken_items_skipped() {
        let source = MemorySource::new()
            .with_broken_item("gone.xhtml")
            .with_item("a.xhtml", chapter_item("Survivor"));
        assert_eq!(detect(&source, &ChapterLimits::default()), vec!["Survivor"]);
    }

    #[test]
    fn test_no_toc_no_headings() {
        let source = MemorySource::new().with_item("a.xhtml", "<p>just prose</p>");
        assert!(detect(&source, &ChapterLimits::default()).is_empty());
    }

    #[test]
    fn test_estimate_page_is_proportional_and_bounded() {
        assert_eq!(estimate_page(0, 10, 300), 0);
        assert_eq!(estimate_page(5, 10, 300), 150);
        assert_eq!(estimate_page(9, 10, 300), 270);
        assert_eq!(estimate_page(99, 10, 300), 270);
        assert_eq!(estimate_page(3, 4, 2), 1);
        assert_eq!(estimate_page(0, 0, 10), 0);
        assert_eq!(estimate_page(2, 3, 0), 0);
    }

    #[test]
    fn test_with_page_estimates() {
        let titles = vec!["A".to_string(), "B".to_string()];
        let chapters = with_page_estimates(&titles, 10);
        assert_eq!(chapters[1].page_index, Some(5));
        assert!(with_page_estimates(&titles, 0).iter().all(|c| c.page_index.is_none()));
    }
}
