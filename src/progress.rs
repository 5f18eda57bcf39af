//! Progress-callback trait for extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ReaderConfigBuilder::progress_callback`] to receive events
//! as the quick pass finishes and the full pass walks the document.
//!
//! The full pass runs on a background task, so every method may be called from
//! a thread other than the one that opened the book.
//!
//! # Example
//!
//! ```rust
//! use inkpage::{ExtractionProgressCallback, ReaderConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     items: Arc<AtomicUsize>,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_item_processed(&self, done: usize, total: usize) {
//!         self.items.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{done}/{total} items");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     items: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ReaderConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called when the quick pass has stored its Partial artifact.
    ///
    /// # Arguments
    /// * `items_read` — content items decoded before a cap was hit
    /// * `pages`      — pages in the Partial artifact
    fn on_quick_pass_complete(&self, items_read: usize, pages: usize) {
        let _ = (items_read, pages);
    }

    /// Called once before the full pass reads its first item.
    fn on_full_pass_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called after each content item of the full pass, decoded or not.
    fn on_item_processed(&self, done: usize, total: usize) {
        let _ = (done, total);
    }

    /// Called when a content item is skipped because it failed to decode.
    fn on_item_error(&self, index: usize, error: &str) {
        let _ = (index, error);
    }

    /// Called after the Full artifact has been stored.
    fn on_full_pass_complete(&self, pages: usize) {
        let _ = pages;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ReaderConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        processed: Arc<AtomicUsize>,
        errors: Arc<AtomicUsize>,
        final_pages: Arc<AtomicUsize>,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_item_processed(&self, _done: usize, _total: usize) {
            self.processed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _index: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_full_pass_complete(&self, pages: usize) {
            self.final_pages.store(pages, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_quick_pass_complete(3, 12);
        cb.on_full_pass_start(40);
        cb.on_item_processed(1, 40);
        cb.on_item_error(2, "missing");
        cb.on_full_pass_complete(300);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            processed: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(AtomicUsize::new(0)),
            final_pages: Arc::new(AtomicUsize::new(0)),
        };

        tracker.on_item_processed(1, 2);
        tracker.on_item_error(1, "bad entry");
        tracker.on_item_processed(2, 2);
        tracker.on_full_pass_complete(17);

        assert_eq!(tracker.processed.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.final_pages.load(Ordering::SeqCst), 17);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn ExtractionProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_full_pass_start(10);
        cb.on_item_processed(1, 10);
    }
}
