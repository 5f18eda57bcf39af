//! Document sources: an ordered sequence of content items plus an optional
//! table of contents.
//!
//! The pipeline only ever sees [`DocumentSource`]. [`epub::EpubOpener`] is the
//! bundled implementation; [`MemorySource`] serves tests and callers that
//! already hold their markup in memory.

pub mod epub;
pub mod markup;

use crate::error::{DecodeError, ReaderError};
use crate::identity::DocumentIdentity;

pub use epub::EpubOpener;

/// One unit of the reading order, typically an XHTML chapter file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    /// Path of the item inside its container.
    pub href: String,
    pub markup: String,
}

impl ContentItem {
    pub fn new(href: impl Into<String>, markup: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            markup: markup.into(),
        }
    }

    /// Plain text with one line per block element.
    pub fn plain_text(&self) -> String {
        markup::plain_text(&self.markup)
    }

    /// Text of every `h1`–`h3` element, in document order.
    pub fn headings(&self) -> Vec<String> {
        markup::headings(&self.markup)
    }
}

/// An opened document.
///
/// Implementations are moved onto the blocking pool, hence `Send`.
pub trait DocumentSource: Send {
    /// Number of content items in reading order.
    fn item_count(&self) -> usize;

    /// Decode the item at `index`. A failure affects that item only.
    fn item(&self, index: usize) -> Result<ContentItem, DecodeError>;

    /// Titles of the top-level table-of-contents entries, possibly empty.
    fn table_of_contents(&self) -> Vec<String>;
}

/// Opens the document named by an identity.
///
/// An `Err` means the whole container is unusable.
pub trait SourceOpener: Send + Sync {
    fn open(&self, identity: &DocumentIdentity) -> Result<Box<dyn DocumentSource>, ReaderError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&DocumentIdentity) -> Result<Box<dyn DocumentSource>, ReaderError> + Send + Sync,
{
    fn open(&self, identity: &DocumentIdentity) -> Result<Box<dyn DocumentSource>, ReaderError> {
        self(identity)
    }
}

// ── In-memory source ─────────────────────────────────────────────────────────

/// A document held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    items: Vec<Result<ContentItem, String>>,
    toc: Vec<String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, href: impl Into<String>, markup: impl Into<String>) -> Self {
        self.items.push(Ok(ContentItem::new(href, markup)));
        self
    }

    /// Append an item that always fails to decode.
    pub fn with_broken_item(mut self, href: impl Into<String>) -> Self {
        self.items.push(Err(href.into()));
        self
    }

    pub fn with_toc<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.toc = titles.into_iter().map(Into::into).collect();
        self
    }
}

impl DocumentSource for MemorySource {
    fn item_count(&self) -> usize {
        self.items.len()
    }

    fn item(&self, index: usize) -> Result<ContentItem, DecodeError> {
        match self.items.get(index) {
            Some(Ok(item)) => Ok(item.clone()),
            Some(Err(href)) => Err(DecodeError::Missing {
                index,
                href: href.clone(),
            }),
            None => Err(DecodeError::OutOfRange { index }),
        }
    }

    fn table_of_contents(&self) -> Vec<String> {
        self.toc.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_reports_items_in_order() {
        let source = MemorySource::new()
            .with_item("a.xhtml", "<p>first</p>")
            .with_broken_item("b.xhtml")
            .with_item("c.xhtml", "<p>third</p>");
        assert_eq!(source.item_count(), 3);
        assert_eq!(source.item(0).unwrap().plain_text(), "first");
        assert!(matches!(source.item(1), Err(DecodeError::Missing { index: 1, .. })));
        assert_eq!(source.item(2).unwrap().href, "c.xhtml");
        assert_eq!(source.item(3), Err(DecodeError::OutOfRange { index: 3 }));
    }

    #[test]
    fn closure_acts_as_opener() {
        let opener = |_: &DocumentIdentity| -> Result<Box<dyn DocumentSource>, ReaderError> {
            Ok(Box::new(MemorySource::new().with_toc(["Only"])))
        };
        let identity = DocumentIdentity::of("/nowhere/book.epub");
        let source = opener.open(&identity).unwrap();
        assert_eq!(source.table_of_contents(), vec!["Only"]);
    }
}
