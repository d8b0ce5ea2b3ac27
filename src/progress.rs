//! Progress-callback trait for per-batch extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events while a document is processed.
//!
//! Batches complete out of order and from several in-flight requests at once,
//! so implementations must be `Send + Sync` and protect any shared state.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2text::{ExtractionProgressCallback, PipelineConfig};
//! use edgequake_pdf2text::pipeline::source::{BatchId, PageRange};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl ExtractionProgressCallback for Counter {
//!     fn on_batch_complete(&self, _id: BatchId, _pages: PageRange, _len: usize, _attempts: u32) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::BatchFailure;
use crate::pipeline::source::{BatchId, PageRange};
use crate::pipeline::summary::ProcessingSummary;
use std::path::Path;
use std::sync::Arc;

/// Called by the pipeline as it processes each document and batch.
///
/// All methods have default no-op implementations.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once per document after the checkpoint is loaded.
    ///
    /// * `total_batches`   — batches the document splits into
    /// * `pending_batches` — batches that will actually be submitted
    fn on_document_start(&self, document: &Path, total_batches: usize, pending_batches: usize) {
        let _ = (document, total_batches, pending_batches);
    }

    /// Called when a batch is admitted into a worker slot.
    fn on_batch_start(&self, id: BatchId, pages: PageRange) {
        let _ = (id, pages);
    }

    /// Called when a batch was extracted successfully.
    fn on_batch_complete(&self, id: BatchId, pages: PageRange, text_len: usize, attempts: u32) {
        let _ = (id, pages, text_len, attempts);
    }

    /// Called when a batch failed permanently.
    fn on_batch_error(&self, id: BatchId, pages: PageRange, error: &BatchFailure) {
        let _ = (id, pages, error);
    }

    /// Called once per document after the summary has been written.
    fn on_document_complete(&self, document: &Path, summary: &ProcessingSummary) {
        let _ = (document, summary);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
