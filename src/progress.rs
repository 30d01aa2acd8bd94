//! Progress-callback trait for per-input resolution events.
//!
//! Inject an [`Arc<dyn ResolveProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to hear about
//! each input as the resolution pipeline fetches and normalises it.
//!
//! # Example
//!
//! ```rust
//! use docstamp::{PipelineConfig, ResolveProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     resolved: AtomicUsize,
//! }
//!
//! impl ResolveProgressCallback for CountingCallback {
//!     fn on_input_resolved(&self, index: usize, filename: &str) {
//!         self.resolved.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("input #{index} ready as {filename}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { resolved: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn ResolveProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the resolution pipeline as it processes each input.
///
/// Inputs of one batch resolve concurrently, so `on_input_*` methods may be
/// called in any order within a batch. All methods default to no-ops.
pub trait ResolveProgressCallback: Send + Sync {
    /// Called once before the first batch starts.
    fn on_resolve_start(&self, total_inputs: usize) {
        let _ = total_inputs;
    }

    /// Called when an input (0-based `index`) begins fetching.
    fn on_input_start(&self, index: usize) {
        let _ = index;
    }

    /// Called when an input has been fetched and normalised.
    fn on_input_resolved(&self, index: usize, filename: &str) {
        let _ = (index, filename);
    }

    /// Called when an input fails; the resolve call fails with it.
    fn on_input_failed(&self, index: usize, error: &str) {
        let _ = (index, error);
    }

    /// Called once after every input resolved successfully.
    fn on_resolve_complete(&self, total_inputs: usize) {
        let _ = total_inputs;
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl ResolveProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ResolveProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        resolved: AtomicUsize,
        failed: AtomicUsize,
        total: AtomicUsize,
    }

    impl ResolveProgressCallback for TrackingCallback {
        fn on_resolve_start(&self, total_inputs: usize) {
            self.total.store(total_inputs, Ordering::SeqCst);
        }

        fn on_input_start(&self, _index: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_input_resolved(&self, _index: usize, _filename: &str) {
            self.resolved.fetch_add(1, Ordering::SeqCst);
        }

        fn on_input_failed(&self, _index: usize, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_resolve_start(2);
        cb.on_input_start(0);
        cb.on_input_resolved(0, "a.pdf");
        cb.on_input_failed(1, "boom");
        cb.on_resolve_complete(2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_resolve_start(3);
        for i in 0..3 {
            tracker.on_input_start(i);
        }
        tracker.on_input_resolved(0, "a.pdf");
        tracker.on_input_resolved(2, "c.png");
        tracker.on_input_failed(1, "HTTP 404");

        assert_eq!(tracker.total.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.resolved.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.failed.load(Ordering::SeqCst), 1);
    }
}
