//! Error types for the medbook-pdf2md library.
//!
//! Every failure that aborts a document is a [`Pdf2MdError`]. There is no
//! page-level or chunk-level partial error: a multi-chunk document either
//! converts completely or fails as a whole, and nothing is persisted for it.
//!
//! Callers that run batches usually want to know whether to try again later
//! or to stop and fix something. [`Pdf2MdError::recovery`] answers that
//! without the caller having to match every variant.

use std::path::PathBuf;
use thiserror::Error;

/// Why a document was rejected before any conversion work was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentDefect {
    /// The page count was read successfully and it is zero.
    NoPages,
    /// Neither the local reader nor the probe job could report a page count.
    PageCountUnknown,
}

impl std::fmt::Display for DocumentDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentDefect::NoPages => f.write_str("document has no pages"),
            DocumentDefect::PageCountUnknown => f.write_str("page count could not be determined"),
        }
    }
}

/// Whether an error is worth retrying unchanged at a later time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Transient condition: rate limiting or a network failure.
    RetryLater,
    /// Will keep failing until someone changes the input, credentials or config.
    NeedsIntervention,
}

/// All fatal errors returned by the medbook-pdf2md library.
#[derive(Debug, Error)]
pub enum Pdf2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Planning errors ───────────────────────────────────────────────────
    /// Page count is zero or could not be discovered.
    #[error("Invalid document '{path}': {defect}")]
    InvalidDocument {
        path: PathBuf,
        defect: DocumentDefect,
    },

    /// The computed content range is empty or inverted.
    #[error("Invalid page range {start}-{end} for a {total_pages}-page document")]
    InvalidRange {
        total_pages: usize,
        start: usize,
        end: usize,
    },

    // ── Service errors ────────────────────────────────────────────────────
    /// Every credential in the pool was refused during submission.
    #[error("All {attempts} credentials were rejected (last status {last_status}): {detail}")]
    CredentialsExhausted {
        attempts: usize,
        last_status: u16,
        detail: String,
    },

    /// The service refused the submission for a reason other than credentials.
    #[error("Submission rejected with HTTP {status}: {detail}")]
    SubmissionRejected { status: u16, detail: String },

    /// Connection-level failure while talking to the service.
    #[error("Transport error: {detail}")]
    Transport { detail: String },

    /// HTTP 429 persisted through the whole retry budget.
    #[error("Rate limited: still HTTP 429 after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// The service accepted the job and later reported it failed.
    #[error("Conversion failed on the service: {detail}")]
    ProcessingFailed { detail: String },

    /// The poll budget ran out without a terminal status.
    #[error("Timed out after {polls} polls ({elapsed_secs}s) waiting for the service")]
    Timeout { polls: u32, elapsed_secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file or an image.
    #[error("Failed to write output '{path}': {source}")]
    PersistenceError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Pdf2MdError {
    /// Classify the error for batch drivers deciding whether to retry.
    pub fn recovery(&self) -> Recovery {
        match self {
            Pdf2MdError::RateLimited { .. } | Pdf2MdError::Transport { .. } => {
                Recovery::RetryLater
            }
            _ => Recovery::NeedsIntervention,
        }
    }

    /// Shorthand for `recovery() == Recovery::RetryLater`.
    pub fn is_retryable(&self) -> bool {
        self.recovery() == Recovery::RetryLater
    }
}
