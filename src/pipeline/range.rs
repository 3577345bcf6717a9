//! Content-range calculation: which pages of a textbook are worth paying for.
//!
//! The service bills per page, and the front matter (title, contents,
//! preface) and back matter (index, glossary) of a medical textbook add
//! nothing to downstream knowledge extraction. [`content_range`] drops a fixed
//! fraction at each end. It is a zero-configuration approximation, not a
//! layout-aware boundary detector.

use crate::config::SkipPolicy;
use crate::error::{DocumentDefect, Pdf2MdError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// An inclusive, zero-indexed page interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    /// Build a range, rejecting inverted bounds.
    pub fn new(start: usize, end: usize) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Number of pages covered (both bounds included).
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Always `false`; ranges hold at least one page.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value of the `page_range` form field, e.g. `"12-915"`.
    pub fn to_form_value(&self) -> String {
        if self.start == self.end {
            self.start.to_string()
        } else {
            format!("{}-{}", self.start, self.end)
        }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Compute the content range for a document of `total_pages` pages.
///
/// `start = floor(total * front_ratio)`, `end = floor(total * (1 - back_ratio))`,
/// both clamped into `[0, total - 1]`.
///
/// # Errors
/// * `InvalidRange` when the document is shorter than the policy minimum or
///   the clamped bounds do not satisfy `start < end`.
/// * `InvalidDocument { NoPages }` for a zero page count. The path is left
///   empty; the orchestrator rejects empty documents with their path before
///   getting here.
pub fn content_range(total_pages: usize, policy: &SkipPolicy) -> Result<PageRange, Pdf2MdError> {
    if total_pages == 0 {
        return Err(Pdf2MdError::InvalidDocument {
            path: PathBuf::new(),
            defect: DocumentDefect::NoPages,
        });
    }

    let last = total_pages - 1;
    let start = ((total_pages as f64 * policy.front_ratio).floor() as usize).min(last);
    let end = ((total_pages as f64 * (1.0 - policy.back_ratio)).floor() as usize).min(last);

    if total_pages < policy.min_total_pages || start >= end {
        return Err(Pdf2MdError::InvalidRange {
            total_pages,
            start,
            end,
        });
    }

    Ok(PageRange { start, end })
}
