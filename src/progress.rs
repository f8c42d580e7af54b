//! Progress-callback trait for per-stage, per-page pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as each stage works through its pages. Callers can forward them to
//! a terminal progress bar, a channel, or a job record without the library
//! knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2pages::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PipelineProgressCallback for Counter {
//!     fn on_item_complete(&self, stage: Stage, index: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage}: page {index} done");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The pipeline stages that report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Render,
    Normalize,
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Render => "render",
            Stage::Normalize => "normalize",
            Stage::Extract => "extract",
        })
    }
}

/// Called by the pipeline as it processes each stage.
///
/// Implementations must be `Send + Sync`. Within a stage, item events arrive
/// in completion order, not page order. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// A stage is about to process `total_items` pages.
    fn on_stage_start(&self, stage: Stage, total_items: usize) {
        let _ = (stage, total_items);
    }

    /// Page `index` (1-based) finished the stage successfully.
    fn on_item_complete(&self, stage: Stage, index: usize) {
        let _ = (stage, index);
    }

    /// Page `index` failed the stage and is dropped from later stages.
    fn on_item_error(&self, stage: Stage, index: usize, error: &str) {
        let _ = (stage, index, error);
    }

    /// Every stage finished; the manifest is about to be written.
    fn on_run_complete(&self, pages: usize, errors: usize) {
        let _ = (pages, errors);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

/// Fire item events for a stage if a callback is configured.
pub(crate) fn report<T, E: fmt::Display>(
    cb: Option<&ProgressCallback>,
    stage: Stage,
    index: usize,
    outcome: &Result<T, E>,
) {
    if let Some(cb) = cb {
        match outcome {
            Ok(_) => cb.on_item_complete(stage, index),
            Err(e) => cb.on_item_error(stage, index, &e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tracking {
        completes: AtomicUsize,
        errors: Mutex<Vec<(Stage, usize, String)>>,
    }

    impl PipelineProgressCallback for Tracking {
        fn on_item_complete(&self, _stage: Stage, _index: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, stage: Stage, index: usize, error: &str) {
            self.errors
                .lock()
                .unwrap()
                .push((stage, index, error.to_string()));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Render, 3);
        cb.on_item_complete(Stage::Render, 1);
        cb.on_item_error(Stage::Normalize, 2, "boom");
        cb.on_run_complete(2, 1);
    }

    #[test]
    fn report_routes_by_outcome() {
        let tracker = Arc::new(Tracking::default());
        let cb: ProgressCallback = tracker.clone();

        report::<(), String>(Some(&cb), Stage::Normalize, 1, &Ok(()));
        report::<(), String>(Some(&cb), Stage::Normalize, 2, &Err("magick failed".into()));
        report::<(), String>(None, Stage::Normalize, 3, &Err("ignored".into()));

        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        let errors = tracker.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0], (Stage::Normalize, 2, "magick failed".to_string()));
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Extract.to_string(), "extract");
    }
}
