//! Result writer: header, images, and an atomic Markdown file.
//!
//! ## Write order
//!
//! Every image is base64-decoded before anything touches the disk, so a
//! malformed image fails the document without leaving files behind. Images
//! are written next, into `<output stem>_images/` beside the Markdown file.
//! The Markdown goes last, to a temp file that is renamed into place: a
//! reader never sees a half-written document, and a Markdown file on disk
//! always has its images present.

use crate::error::Pdf2MdError;
use crate::output::{ContentPlan, ConversionResult};
use crate::pipeline::postprocess::clean_markdown;
use base64::Engine;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Files produced for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenOutput {
    pub markdown_path: PathBuf,
    /// `None` when the result carried no images.
    pub image_dir: Option<PathBuf>,
    pub images: usize,
}

/// Render the final document: provenance header followed by the cleaned body.
///
/// ```text
/// # <stem>
///
/// **Source:** <file name>
/// **Pages Parsed:** <start>-<end> (0-indexed)
/// **Total Pages:** <content page count>
///
/// ---
///
/// <body>
/// ```
pub fn render_document(result: &ConversionResult, plan: &ContentPlan, stem: &str) -> String {
    let range = plan.content_range;
    format!(
        "# {stem}\n\n**Source:** {source}\n**Pages Parsed:** {start}-{end} (0-indexed)\n\
         **Total Pages:** {pages}\n\n---\n\n{body}",
        source = plan.source_name,
        start = range.start,
        end = range.end,
        pages = plan.content_pages(),
        body = clean_markdown(&result.markdown),
    )
}

/// Directory that holds a document's images: `<parent>/<output stem>_images`.
pub fn image_dir_for(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    output_path.with_file_name(format!("{stem}_images"))
}

/// Write `result` for `plan` to `output_path`.
///
/// # Errors
/// `PersistenceError` naming the file that could not be decoded or written.
pub async fn write_result(
    result: &ConversionResult,
    plan: &ContentPlan,
    stem: &str,
    output_path: &Path,
) -> Result<WrittenOutput, Pdf2MdError> {
    let image_dir = image_dir_for(output_path);
    let images = decode_images(result, &image_dir)?;

    if let Some(parent) = output_path.parent() {
        create_dir(parent).await?;
    }

    // Only a directory created here is removed again on failure.
    let image_dir_existed = tokio::fs::try_exists(&image_dir).await.unwrap_or(true);

    if !images.is_empty() {
        create_dir(&image_dir).await?;
        if let Err(e) = write_images(&images).await {
            discard_image_dir(&image_dir, image_dir_existed).await;
            return Err(e);
        }
        debug!("Wrote {} images to {}", images.len(), image_dir.display());
    }

    let document = render_document(result, plan, stem);
    let tmp_path = output_path.with_extension("md.tmp");
    if let Err(e) = write_atomic(&tmp_path, output_path, &document).await {
        if let Err(rm) = tokio::fs::remove_file(&tmp_path).await {
            if rm.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove {}: {}", tmp_path.display(), rm);
            }
        }
        if !images.is_empty() {
            discard_image_dir(&image_dir, image_dir_existed).await;
        }
        return Err(e);
    }

    info!(
        "Saved {} ({} chars, {} images)",
        output_path.display(),
        document.len(),
        images.len()
    );

    Ok(WrittenOutput {
        markdown_path: output_path.to_path_buf(),
        image_dir: (!images.is_empty()).then_some(image_dir),
        images: images.len(),
    })
}

/// Decode every image up front. Names are reduced to their final path
/// component so a service-supplied name cannot escape the image directory.
fn decode_images(
    result: &ConversionResult,
    image_dir: &Path,
) -> Result<Vec<(PathBuf, Vec<u8>)>, Pdf2MdError> {
    let engine = base64::engine::general_purpose::STANDARD;

    result
        .images
        .iter()
        .map(|(name, encoded)| {
            let path = match Path::new(name).file_name() {
                Some(file_name) => image_dir.join(file_name),
                None => {
                    return Err(persistence(
                        &image_dir.join(name),
                        io::Error::new(io::ErrorKind::InvalidInput, "unusable image file name"),
                    ))
                }
            };
            let bytes = engine
                .decode(encoded.trim())
                .map_err(|e| persistence(&path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
            Ok((path, bytes))
        })
        .collect()
}

async fn write_images(images: &[(PathBuf, Vec<u8>)]) -> Result<(), Pdf2MdError> {
    for (path, bytes) in images {
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| persistence(path, e))?;
    }
    Ok(())
}

async fn write_atomic(
    tmp_path: &Path,
    output_path: &Path,
    document: &str,
) -> Result<(), Pdf2MdError> {
    tokio::fs::write(tmp_path, document)
        .await
        .map_err(|e| persistence(output_path, e))?;
    tokio::fs::rename(tmp_path, output_path)
        .await
        .map_err(|e| persistence(output_path, e))
}

async fn discard_image_dir(image_dir: &Path, existed: bool) {
    if existed {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(image_dir).await {
        warn!("Could not remove {}: {}", image_dir.display(), e);
    }
}

async fn create_dir(dir: &Path) -> Result<(), Pdf2MdError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| persistence(dir, e))
}

fn persistence(path: &Path, source: io::Error) -> Pdf2MdError {
    Pdf2MdError::PersistenceError {
        path: path.to_path_buf(),
        source,
    }
}
