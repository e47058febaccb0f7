//! Progress-callback trait for per-file analysis events.
//!
//! Inject an [`Arc<dyn AnalysisProgressCallback>`] via
//! [`crate::config::AnalysisConfigBuilder::progress_callback`] to receive
//! events as the pipeline extracts each file and calls the model. Events are
//! diagnostic only and never influence the result.
//!
//! # Example
//!
//! ```rust
//! use edgequake_medreport::{AnalysisConfig, AnalysisProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     extracted: AtomicUsize,
//! }
//!
//! impl AnalysisProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, name: &str, chars: usize) {
//!         self.extracted.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{name}: {chars} chars");
//!     }
//! }
//!
//! let config = AnalysisConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { extracted: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes a batch.
///
/// Implementations must be `Send + Sync`: files are extracted concurrently,
/// so `on_file_*` and `on_ocr_progress` may be called from different tasks
/// at the same time. All methods default to no-ops.
pub trait AnalysisProgressCallback: Send + Sync {
    /// Called once after validation, before any extraction.
    fn on_analysis_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called just before a file's extraction strategy runs.
    fn on_file_start(&self, name: &str) {
        let _ = name;
    }

    /// Coarse OCR progress for an image file, `percent` in 0–100.
    fn on_ocr_progress(&self, name: &str, percent: u8) {
        let _ = (name, percent);
    }

    /// Called when a file produced usable text.
    fn on_file_complete(&self, name: &str, chars: usize) {
        let _ = (name, chars);
    }

    /// Called when a file failed extraction. The batch continues.
    fn on_file_error(&self, name: &str, error: &str) {
        let _ = (name, error);
    }

    /// Called just before the prompt is sent to the model.
    fn on_model_start(&self, prompt_chars: usize) {
        let _ = prompt_chars;
    }

    /// Called once when the model answered and the result is coerced.
    fn on_analysis_complete(&self, processed_files: usize, total_files: usize) {
        let _ = (processed_files, total_files);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnalysisProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnalysisConfig`].
pub type ProgressCallback = Arc<dyn AnalysisProgressCallback>;
