//! Progress-callback trait for per-snippet build events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::render::RendererBuilder::progress_callback`] to receive events as
//! the renderer works through a batch.
//!
//! # Example
//!
//! ```rust
//! use tex2svg::{Outcome, RenderProgressCallback, Renderer};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl RenderProgressCallback for CountingCallback {
//!     fn on_snippet_complete(&self, index: usize, total: usize, outcome: Outcome, svg_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("snippet {}/{} {:?} ({} bytes)", index + 1, total, outcome, svg_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let renderer = Renderer::builder()
//!     .progress_callback(counter as Arc<dyn RenderProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::fingerprint::Fingerprint;
use crate::output::Outcome;
use crate::render::BuildState;
use std::sync::Arc;

/// Called by the renderer as it processes snippets.
///
/// Snippets in a batch build concurrently, so methods may be called from
/// several tasks at once. All methods default to no-ops.
pub trait RenderProgressCallback: Send + Sync {
    /// Called once before a batch starts.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a snippet is picked up. `index` is 0-based.
    fn on_snippet_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called on every state transition of a build this renderer runs.
    fn on_state_change(&self, fingerprint: &Fingerprint, state: BuildState) {
        let _ = (fingerprint, state);
    }

    /// Called when a snippet produced an SVG.
    fn on_snippet_complete(&self, index: usize, total: usize, outcome: Outcome, svg_len: usize) {
        let _ = (index, total, outcome, svg_len);
    }

    /// Called when a snippet failed.
    fn on_snippet_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every snippet of a batch has been attempted.
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type held by [`crate::Renderer`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        transitions: AtomicUsize,
    }

    impl TrackingCallback {
        fn new() -> Self {
            Self {
                starts: AtomicUsize::new(0),
                completes: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
                transitions: AtomicUsize::new(0),
            }
        }
    }

    impl RenderProgressCallback for TrackingCallback {
        fn on_snippet_start(&self, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_state_change(&self, _fp: &Fingerprint, _state: BuildState) {
            self.transitions.fetch_add(1, Ordering::SeqCst);
        }
        fn on_snippet_complete(&self, _i: usize, _t: usize, _o: Outcome, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_snippet_error(&self, _i: usize, _t: usize, _e: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let fp = Fingerprint::parse(&"0".repeat(64)).unwrap();
        cb.on_batch_start(2);
        cb.on_snippet_start(0, 2);
        cb.on_state_change(&fp, BuildState::Compiling);
        cb.on_snippet_complete(0, 2, Outcome::Built, 100);
        cb.on_snippet_error(1, 2, "boom");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn test_tracking_callback_counts() {
        let cb = Arc::new(TrackingCallback::new());
        let fp = Fingerprint::parse(&"a".repeat(64)).unwrap();
        cb.on_snippet_start(0, 3);
        cb.on_snippet_start(1, 3);
        cb.on_state_change(&fp, BuildState::Compiling);
        cb.on_snippet_complete(0, 3, Outcome::Cached, 10);
        cb.on_snippet_error(1, 3, "x");
        assert_eq!(cb.starts.load(Ordering::SeqCst), 2);
        assert_eq!(cb.transitions.load(Ordering::SeqCst), 1);
        assert_eq!(cb.completes.load(Ordering::SeqCst), 1);
        assert_eq!(cb.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_is_object_safe() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_complete(0, 0);
    }
}
