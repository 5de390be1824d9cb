//! Progress-callback trait for per-chunk extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator walks each document's chunks.
//!
//! Small documents that skip chunking still report as a single chunk
//! (`total_chunks == 1`) so a progress bar does not need a special case.
//!
//! # Example
//!
//! ```rust
//! use pdf2questions::{ExtractionProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     questions: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, _doc: &str, _chunk: usize, _total: usize, count: usize) {
//!         self.questions.fetch_add(count, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { questions: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each document and chunk.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Chunks of one document are reported strictly in
/// order; the trait is still `Send + Sync` so it can live inside a config
/// shared across tasks.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once per document, after the chunk plan is known.
    ///
    /// # Arguments
    /// * `document`    : document name (file stem)
    /// * `total_chunks`: number of completion calls that will be made
    fn on_document_start(&self, document: &str, total_chunks: usize) {
        let _ = (document, total_chunks);
    }

    /// Called just before the completion request for a chunk.
    ///
    /// # Arguments
    /// * `chunk`: 1-indexed chunk number
    fn on_chunk_start(&self, document: &str, chunk: usize, total_chunks: usize) {
        let _ = (document, chunk, total_chunks);
    }

    /// Called when a chunk's questions have been normalised and persisted.
    ///
    /// # Arguments
    /// * `question_count`: valid questions the chunk contributed (may be 0)
    fn on_chunk_complete(
        &self,
        document: &str,
        chunk: usize,
        total_chunks: usize,
        question_count: usize,
    ) {
        let _ = (document, chunk, total_chunks, question_count);
    }

    /// Called when a chunk failed after all retries; it contributes nothing.
    fn on_chunk_error(&self, document: &str, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (document, chunk, total_chunks, error);
    }

    /// Called once after every chunk of a document has been attempted.
    fn on_document_complete(&self, document: &str, question_count: usize) {
        let _ = (document, question_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
