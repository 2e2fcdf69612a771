//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the converter processes each page. The server installs
//! [`TracingProgressCallback`] so page-level progress ends up in the logs.
//!
//! # Callbacks rather than channels
//!
//! The converter does not know how the host reports progress. A callback
//! can forward into a broadcast channel, a metrics counter or a log line
//! without the converter taking a dependency on any of them.
//!
//! # Example
//!
//! ```rust
//! use mdparse::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use tracing::{debug, info, warn};

/// Called by the converter as it processes each page.
///
/// Implementations must be `Send + Sync`: one converter serves many requests
/// at once, and pages of a single document may complete concurrently. All
/// methods have default no-op implementations so callers only override what
/// they care about.
///
/// # Thread safety
///
/// With `maintain_format = false`, `on_page_start`, `on_page_complete` and
/// `on_page_error` can fire concurrently, and in any page order. Events from
/// different requests interleave as well. Guard shared state with atomics
/// or a `Mutex`.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any page is sent to the VLM.
    ///
    /// # Arguments
    /// * `total_pages`: number of pages that will be processed
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the VLM request is sent for a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page is successfully converted.
    ///
    /// # Arguments
    /// * `page_num`    : 1-indexed page number
    /// * `total_pages` : total pages
    /// * `markdown_len`: byte length of the produced Markdown
    fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
        let _ = (page_num, total_pages, markdown_len);
    }

    /// Called when a page fails after all retries are exhausted.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    ///
    /// # Arguments
    /// * `total_pages`  : pages attempted
    /// * `success_count`: pages that converted without error
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Forwards progress events to `tracing`.
///
/// Page-level events are `debug`, document-level events `info`, page
/// failures `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressCallback;

impl ConversionProgressCallback for TracingProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        info!(total_pages, "Converting document");
    }

    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        debug!(page_num, total_pages, "Page started");
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, markdown_len: usize) {
        debug!(page_num, total_pages, markdown_len, "Page converted");
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        warn!(page_num, total_pages, error, "Page failed");
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        info!(
            total_pages,
            success_count,
            failed = total_pages.saturating_sub(success_count),
            "Document converted"
        );
    }
}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        started_total: AtomicUsize,
        completed_total: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_conversion_start(&self, total_pages: usize) {
            self.started_total.store(total_pages, Ordering::SeqCst);
        }

        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, _markdown_len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_complete(&self, _total_pages: usize, success_count: usize) {
            self.completed_total.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_and_tracing_callbacks_do_not_panic() {
        let callbacks: [ProgressCallback; 2] =
            [Arc::new(NoopProgressCallback), Arc::new(TracingProgressCallback)];
        for cb in callbacks {
            cb.on_conversion_start(5);
            cb.on_page_start(1, 5);
            cb.on_page_complete(1, 5, 42);
            cb.on_page_error(2, 5, "some error");
            cb.on_conversion_complete(5, 4);
        }
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_conversion_start(3);
        assert_eq!(tracker.started_total.load(Ordering::SeqCst), 3);

        tracker.on_page_start(1, 3);
        tracker.on_page_complete(1, 3, 100);
        tracker.on_page_start(2, 3);
        tracker.on_page_complete(2, 3, 200);
        tracker.on_page_start(3, 3);
        tracker.on_page_error(3, 3, "VLM timeout");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);

        tracker.on_conversion_complete(3, 2);
        assert_eq!(tracker.completed_total.load(Ordering::SeqCst), 2);
    }
}
