//! # medbook-pdf2md
//!
//! Convert long medical textbook PDFs to Markdown through a hosted,
//! credit-limited conversion service (Marker).
//!
//! ## Why this crate?
//!
//! The service does the hard part, layout analysis and OCR, but it bills per
//! page and every API key carries a finite credit balance. Converting a
//! library of thousand-page textbooks therefore needs orchestration around
//! the service rather than a thin client: skip front and back matter nobody
//! will read, spread long books across keys, move on to the next key when one
//! runs dry, back off when rate limited, and never leave a half-written file
//! behind.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    read once, check the %PDF magic
//!  ├─ 2. Pages    count locally with pdfium, else one-page probe job
//!  ├─ 3. Range    drop ~1.4 % front matter and ~8.5 % back matter
//!  ├─ 4. Split    two chunks across keys when over the per-key budget
//!  ├─ 5. Client   submit (rotating keys on 401/402/403), poll to completion
//!  └─ 6. Persist  header + images + atomic Markdown write
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medbook_pdf2md::{convert_to_file, ConversionConfig, CredentialPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = CredentialPool::from_list(&std::env::var("MARKER_API_KEYS")?)?;
//!     let config = ConversionConfig::builder().build()?;
//!     let stats = convert_to_file(
//!         "textbooks/cardiology.pdf",
//!         "parsed/cardiology_content.md",
//!         &pool,
//!         &config,
//!     )
//!     .await?;
//!     eprintln!("{} pages in {} job(s)", stats.content_pages, stats.jobs);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `medbook2md` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! medbook-pdf2md = { version = "0.1", default-features = false }
//! ```
//!
//! ## Cost
//!
//! | Mode | $/page | 1 000-page book |
//! |------|--------|-----------------|
//! | default | $0.004 | ~$3.60 after skipping front/back matter |
//! | `use_llm` | $0.006 | ~$5.40 |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod credentials;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionConfig, ConversionConfigBuilder, CostModel, OutputFormat, RetryPolicy, SkipPolicy,
};
pub use convert::{convert, convert_sync, convert_to_file, default_output_path, plan};
pub use credentials::{Credential, CredentialPool};
pub use error::{DocumentDefect, Pdf2MdError, Recovery};
pub use output::{ContentPlan, ConversionOutput, ConversionResult, ConversionStats};
pub use pipeline::client::{ConversionClient, ConversionJob, JobState};
pub use pipeline::range::{content_range, PageRange};
pub use pipeline::service::{ConversionService, HttpConversionService};
pub use progress::{ConversionProgressCallback, JobTicket, NoopProgressCallback, ProgressCallback};
