//! Progress-callback trait for conversion lifecycle events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to observe a
//! document as it moves through planning, submission, polling and
//! persistence. Every job event carries a [`JobTicket`] (job id and range)
//! and, where meaningful, the elapsed time since the job was submitted.
//!
//! The orchestrator also logs the same milestones through `tracing`; the
//! callback exists for hosts that want to drive a UI rather than read logs.
//!
//! # Example
//!
//! ```rust
//! use medbook_pdf2md::{ConversionConfig, ConversionProgressCallback, JobTicket};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//! use std::time::Duration;
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_job_complete(&self, job: &JobTicket, elapsed: Duration, markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{} done in {:?} ({} bytes)", job.id, elapsed, markdown_len);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ContentPlan;
use crate::pipeline::range::PageRange;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Identifies one conversion job within a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    /// `"<file name>#<index>/<total>"`, or `"<file name>#probe"`.
    pub id: String,
    /// 1-based position among the document's jobs.
    pub index: usize,
    pub total: usize,
    /// `None` for the page-count probe.
    pub range: Option<PageRange>,
}

impl JobTicket {
    pub fn chunk(source_name: &str, index: usize, total: usize, range: PageRange) -> Self {
        Self {
            id: format!("{source_name}#{index}/{total}"),
            index,
            total,
            range: Some(range),
        }
    }

    pub fn probe(source_name: &str) -> Self {
        Self {
            id: format!("{source_name}#probe"),
            index: 1,
            total: 1,
            range: None,
        }
    }
}

/// Called by the orchestrator as a document is converted.
///
/// Implementations must be `Send + Sync`. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once the content range and job split are known.
    fn on_document_start(&self, plan: &ContentPlan) {
        let _ = plan;
    }

    /// Called after the service accepted a job.
    ///
    /// * `credential` — masked credential that was accepted
    fn on_job_submitted(&self, job: &JobTicket, credential: &str) {
        let _ = (job, credential);
    }

    /// Called whenever the pool advances.
    ///
    /// * `reason` — e.g. `"HTTP 402"` or `"next chunk"`
    fn on_credential_rotated(&self, from: usize, to: usize, reason: &str) {
        let _ = (from, to, reason);
    }

    /// Called after each status check that did not reach a terminal state.
    fn on_job_polling(&self, job: &JobTicket, polls: u32, elapsed: Duration) {
        let _ = (job, polls, elapsed);
    }

    /// Called when the service reports the job complete.
    fn on_job_complete(&self, job: &JobTicket, elapsed: Duration, markdown_len: usize) {
        let _ = (job, elapsed, markdown_len);
    }

    /// Called when a job ends in failure, rejection or timeout.
    fn on_job_failed(&self, job: &JobTicket, elapsed: Duration, error: &str) {
        let _ = (job, elapsed, error);
    }

    /// Called after the merged output has been written.
    fn on_document_complete(&self, plan: &ContentPlan, output: Option<&Path>) {
        let _ = (plan, output);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
