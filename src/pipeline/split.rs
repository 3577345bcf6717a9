//! Job splitting: spread a long content range across credentials.
//!
//! A single credential is budgeted for [`max_pages_per_credential`] pages. When
//! the content range is larger and the pool holds more than one credential,
//! the range is cut into two contiguous halves and each half is submitted
//! under a different credential: the pool is rotated before every chunk after
//! the first, so credit consumption is spread deliberately rather than only on
//! exhaustion. The halves are converted one after the other and merged in
//! range order.
//!
//! Only two chunks are ever produced. A half that still exceeds the budget is
//! submitted anyway (with a warning) and credential rotation on exhaustion
//! takes care of the rest.
//!
//! [`max_pages_per_credential`]: crate::config::ConversionConfig::max_pages_per_credential

use crate::error::Pdf2MdError;
use crate::output::ConversionResult;
use crate::pipeline::client::{ConversionClient, ConversionJob};
use crate::pipeline::range::PageRange;
use crate::pipeline::service::DocumentPayload;
use crate::progress::JobTicket;
use tracing::{info, warn};

/// Decide the job ranges for `content`.
///
/// Returns `[content]` unless `content` exceeds `budget` pages and there is
/// more than one credential to spread it over; otherwise two halves
/// `[start, start + n/2 - 1]` and `[start + n/2, end]` that together cover
/// every page of `content` exactly once.
pub fn plan_jobs(content: PageRange, budget: usize, pool_size: usize) -> Vec<PageRange> {
    let pages = content.len();
    if pages <= budget || pool_size < 2 {
        if pages > budget {
            warn!(
                "{} pages exceed the {}-page budget but only one credential is configured",
                pages, budget
            );
        }
        return vec![content];
    }

    let split_at = content.start + pages / 2;
    let first = PageRange {
        start: content.start,
        end: split_at - 1,
    };
    let second = PageRange {
        start: split_at,
        end: content.end,
    };

    for half in [first, second] {
        if half.len() > budget {
            warn!(
                "Chunk {} ({} pages) still exceeds the {}-page budget",
                half,
                half.len(),
                budget
            );
        }
    }
    info!(
        "Splitting {} pages into {} + {} across credentials",
        pages,
        first.len(),
        second.len()
    );
    vec![first, second]
}

/// Run `jobs` in order and merge their results.
///
/// The first failing job aborts the whole document; results of jobs that
/// already completed are discarded with it.
pub async fn run_jobs(
    client: &ConversionClient<'_>,
    document: &DocumentPayload,
    jobs: &[PageRange],
) -> Result<ConversionResult, Pdf2MdError> {
    let total = jobs.len();
    let mut parts = Vec::with_capacity(total);

    for (i, range) in jobs.iter().enumerate() {
        if i > 0 {
            client.rotate("next chunk");
        }
        let ticket = JobTicket::chunk(&document.file_name, i + 1, total, *range);
        let mut job = ConversionJob::for_range(ticket, *range);
        parts.push(client.submit_and_wait(document, &mut job).await?);
    }

    Ok(ConversionResult::merge(parts))
}
