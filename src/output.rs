//! Result types returned by the conversion entry points.

use crate::pipeline::range::PageRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Converted content of one job, or of several jobs merged in range order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Converted body (Markdown unless another output format was requested).
    pub markdown: String,
    /// Image file name → base64-encoded bytes, exactly as the service sent them.
    /// Decoded by [`crate::pipeline::persist`] when written to disk.
    pub images: BTreeMap<String, String>,
    /// Free-form metadata reported by the service.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ConversionResult {
    /// Merge per-job results that are already sorted by ascending range.
    ///
    /// Bodies are joined with a blank line. Image maps are unioned and a later
    /// job's entry wins on a file-name collision; the same goes for metadata
    /// keys.
    pub fn merge(parts: impl IntoIterator<Item = ConversionResult>) -> ConversionResult {
        let mut bodies: Vec<String> = Vec::new();
        let mut images = BTreeMap::new();
        let mut metadata = serde_json::Map::new();

        for part in parts {
            bodies.push(part.markdown);
            images.extend(part.images);
            metadata.extend(part.metadata);
        }

        ConversionResult {
            markdown: bodies.join("\n\n"),
            images,
            metadata,
        }
    }

    /// Page count reported by a probe job, under any of the names the service
    /// has used for it.
    pub fn reported_page_count(&self) -> Option<usize> {
        ["pages", "num_pages", "page_count"]
            .iter()
            .filter_map(|k| self.metadata.get(*k))
            .find_map(|v| match v {
                serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
                serde_json::Value::Array(a) => Some(a.len()),
                _ => None,
            })
            .filter(|&n| n > 0)
    }
}

/// What the orchestrator intends to convert, computed before any paid work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPlan {
    /// File name of the source PDF.
    pub source_name: String,
    pub total_pages: usize,
    /// Pages considered body text.
    pub content_range: PageRange,
    /// One entry per job, in submission order.
    pub jobs: Vec<PageRange>,
    /// Estimated service charge in US dollars.
    pub estimated_cost_usd: f64,
}

impl ContentPlan {
    pub fn content_pages(&self) -> usize {
        self.content_range.len()
    }

    pub fn is_split(&self) -> bool {
        self.jobs.len() > 1
    }
}

/// Counters collected while a document is converted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_pages: usize,
    pub content_pages: usize,
    /// Jobs that ran to completion.
    pub jobs: usize,
    /// Status checks across all jobs.
    pub polls: u32,
    /// Credential rotations caused by exhaustion or by chunk hand-over.
    pub credential_rotations: usize,
    pub images: usize,
    pub total_duration_ms: u64,
    pub estimated_cost_usd: f64,
}

/// Full output of [`crate::convert::convert`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    pub plan: ContentPlan,
    pub result: ConversionResult,
    pub stats: ConversionStats,
}
