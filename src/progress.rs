//! Progress-callback trait for extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline plans regions, submits batches, polls the provider
//! and finalises each table. Batches can take minutes to hours, so the poll
//! event is the one a CLI spinner cares about most.
//!
//! # Example
//!
//! ```rust
//! use papertab::{BatchPass, ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     submitted: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_batch_submitted(&self, pass: BatchPass, requests: usize) {
//!         self.submitted.fetch_add(requests, Ordering::SeqCst);
//!         eprintln!("{pass} batch: {requests} requests");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { submitted: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(cb as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::VisionDetail;
use crate::provider::BatchCounts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which of the (at most two) batches a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPass {
    First,
    Recrop,
}

impl fmt::Display for BatchPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchPass::First => f.write_str("first-pass"),
            BatchPass::Recrop => f.write_str("recrop"),
        }
    }
}

/// Called by the pipeline as it makes progress.
///
/// Implementations must be `Send + Sync`. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after planning, before any region is rendered.
    ///
    /// # Arguments
    /// * `documents` — documents that opened successfully
    /// * `tables`    — regions planned across those documents
    fn on_extraction_start(&self, documents: usize, tables: usize) {
        let _ = (documents, tables);
    }

    /// Called right after a batch has been accepted by the provider.
    fn on_batch_submitted(&self, pass: BatchPass, requests: usize) {
        let _ = (pass, requests);
    }

    /// Called after every status poll of a running batch.
    fn on_batch_polled(&self, pass: BatchPass, counts: &BatchCounts) {
        let _ = (pass, counts);
    }

    /// Called when a table reaches its final state.
    fn on_table_complete(&self, detail: &VisionDetail) {
        let _ = detail;
    }

    /// Called once after every table has been finalised.
    ///
    /// # Arguments
    /// * `tables`    — tables finalised
    /// * `succeeded` — tables whose kept answer parsed successfully
    fn on_extraction_complete(&self, tables: usize, succeeded: usize) {
        let _ = (tables, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
