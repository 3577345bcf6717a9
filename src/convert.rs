//! Document-level conversion entry points.
//!
//! One call converts one textbook, start to finish, strictly in sequence:
//! load, count pages, compute the content range, plan the jobs, run them,
//! merge, and (for [`convert_to_file`]) persist. Any failure aborts the
//! document and nothing is written for it; batch callers simply move on to
//! the next input.
//!
//! The [`CredentialPool`] is passed in rather than owned by the config: it
//! carries rotation state that should survive from one document to the next
//! in a batch, so a key found exhausted on book 3 is not retried first on
//! book 4.

use crate::config::ConversionConfig;
use crate::credentials::CredentialPool;
use crate::error::Pdf2MdError;
use crate::output::{ContentPlan, ConversionOutput, ConversionStats};
use crate::pipeline::client::ConversionClient;
use crate::pipeline::input::{self, SourceDocument};
use crate::pipeline::service::{ConversionService, HttpConversionService};
use crate::pipeline::{pages, persist, range, split};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Suffix appended to the input stem for the default output file name.
pub const OUTPUT_SUFFIX: &str = "_content.md";

/// Convert a local PDF and return the merged result in memory.
///
/// # Errors
/// Any [`Pdf2MdError`]; see [`Pdf2MdError::recovery`] for which are worth
/// retrying.
pub async fn convert(
    input: impl AsRef<Path>,
    pool: &CredentialPool,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2MdError> {
    let (_, output) = convert_document(input.as_ref(), pool, config).await?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(&output.plan, None);
    }
    Ok(output)
}

/// Convert a local PDF and write the result to `output_path`.
///
/// Images go to `<output stem>_images/` beside the Markdown file. The
/// Markdown is written atomically and only after every job succeeded and
/// every image was written.
pub async fn convert_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    pool: &CredentialPool,
    config: &ConversionConfig,
) -> Result<ConversionStats, Pdf2MdError> {
    let output_path = output_path.as_ref();
    let (document, output) = convert_document(input.as_ref(), pool, config).await?;

    let written =
        persist::write_result(&output.result, &output.plan, &document.stem, output_path).await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(&output.plan, Some(&written.markdown_path));
    }

    Ok(ConversionStats {
        images: written.images,
        ..output.stats
    })
}

/// Synchronous wrapper around [`convert_to_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    pool: &CredentialPool,
    config: &ConversionConfig,
) -> Result<ConversionStats, Pdf2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_to_file(input, output_path, pool, config))
}

/// Work out what a conversion would submit, without submitting it.
///
/// Nothing is billed when the page count can be read locally. If it cannot,
/// a one-page probe job is submitted to learn it.
pub async fn plan(
    input: impl AsRef<Path>,
    pool: &CredentialPool,
    config: &ConversionConfig,
) -> Result<ContentPlan, Pdf2MdError> {
    let document = input::load_document(input.as_ref()).await?;
    let service = resolve_service(config)?;
    let client = ConversionClient::new(service.as_ref(), pool, config);
    prepare(&document, &client, config).await
}

/// `<output_dir>/<input stem>_content.md`
pub fn default_output_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    output_dir.join(format!("{stem}{OUTPUT_SUFFIX}"))
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn convert_document(
    input: &Path,
    pool: &CredentialPool,
    config: &ConversionConfig,
) -> Result<(SourceDocument, ConversionOutput), Pdf2MdError> {
    let total_start = Instant::now();
    info!("Starting conversion: {}", input.display());

    // ── Step 1: Load and validate ────────────────────────────────────────
    let document = input::load_document(input).await?;

    // ── Step 2: Resolve the service ──────────────────────────────────────
    let service = resolve_service(config)?;
    let client = ConversionClient::new(service.as_ref(), pool, config);

    // ── Step 3: Page count, content range, job plan ──────────────────────
    let plan = prepare(&document, &client, config).await?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(&plan);
    }

    // ── Step 4: Run the jobs in order and merge ──────────────────────────
    let result = split::run_jobs(&client, &document.payload, &plan.jobs).await?;

    let stats = ConversionStats {
        total_pages: plan.total_pages,
        content_pages: plan.content_pages(),
        jobs: plan.jobs.len(),
        polls: client.polls(),
        credential_rotations: client.rotations(),
        images: result.images.len(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        estimated_cost_usd: plan.estimated_cost_usd,
    };

    info!(
        "Conversion complete: {} ({} content pages, {} job(s), {}ms)",
        document.file_name(),
        stats.content_pages,
        stats.jobs,
        stats.total_duration_ms
    );

    Ok((
        document,
        ConversionOutput {
            plan,
            result,
            stats,
        },
    ))
}

async fn prepare(
    document: &SourceDocument,
    client: &ConversionClient<'_>,
    config: &ConversionConfig,
) -> Result<ContentPlan, Pdf2MdError> {
    let (total_pages, source) = pages::count_pages(document, client, config).await?;
    let content_range = range::content_range(total_pages, &config.skip_policy)?;
    let jobs = split::plan_jobs(
        content_range,
        config.max_pages_per_credential,
        client.pool().len(),
    );

    if let Some(bad) = jobs.iter().find(|j| j.start >= j.end) {
        return Err(Pdf2MdError::InvalidRange {
            total_pages,
            start: bad.start,
            end: bad.end,
        });
    }

    let plan = ContentPlan {
        source_name: document.file_name().to_string(),
        total_pages,
        content_range,
        estimated_cost_usd: config
            .cost_model
            .estimate(content_range.len(), config.use_llm),
        jobs,
    };

    debug!("Page count source: {:?}", source);
    info!(
        "{}: {} pages, parsing {} ({} pages) in {} job(s), est. ${:.2}",
        plan.source_name,
        plan.total_pages,
        plan.content_range,
        plan.content_pages(),
        plan.jobs.len(),
        plan.estimated_cost_usd
    );
    Ok(plan)
}

/// Use the pre-built service if the caller supplied one, otherwise build the
/// HTTP client for `config.api_url`.
fn resolve_service(config: &ConversionConfig) -> Result<Arc<dyn ConversionService>, Pdf2MdError> {
    if let Some(ref service) = config.service {
        return Ok(Arc::clone(service));
    }
    let service = HttpConversionService::new(
        config.api_url.clone(),
        config.request_timeout_secs,
        config.rate_limit,
    )
    .map_err(|e| Pdf2MdError::InvalidConfig(format!("HTTP client: {e}")))?;
    Ok(Arc::new(service))
}
