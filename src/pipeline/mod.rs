//! Pipeline stages for textbook conversion.
//!
//! Each submodule implements exactly one step. The orchestrator in
//! [`crate::convert`] runs them strictly in sequence for one document; there
//! is no concurrency between jobs because the credential pool is a shared
//! cursor and the service bills per submitted page.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ pages ──▶ range ──▶ split ──▶ client ──▶ postprocess ──▶ persist
//! (%PDF)   (count)   (skip)   (plan)   (submit/poll)  (cleanup)     (disk)
//! ```
//!
//! 1. [`input`]   — read the file once and check the PDF magic
//! 2. [`pages`]   — count pages with pdfium, or with a one-page probe job
//! 3. [`range`]   — drop front and back matter
//! 4. [`split`]   — divide the range across credentials when it exceeds one
//!    credential's budget, then run the jobs in order
//! 5. [`client`]  — submit with credential rotation, poll to completion;
//!    talks to the remote service through [`service`]
//! 6. [`postprocess`] — cosmetic whitespace cleanup
//! 7. [`persist`] — header, images, atomic Markdown write

pub mod client;
pub mod input;
pub mod pages;
pub mod persist;
pub mod postprocess;
pub mod range;
pub mod service;
pub mod split;
