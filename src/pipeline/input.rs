//! Input resolution: turn a user-supplied path into an uploadable document.
//!
//! The whole file is read into memory once and shared (via `Bytes`) between
//! the page counter and every job's upload, so a split document is read from
//! disk a single time. The `%PDF` magic is checked before anything is sent:
//! a mislabelled file should fail locally rather than cost a submission.

use crate::error::Pdf2MdError;
use crate::pipeline::service::DocumentPayload;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF read from disk.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    /// File name without extension, used for the output header and file name.
    pub stem: String,
    pub payload: DocumentPayload,
}

impl SourceDocument {
    pub fn file_name(&self) -> &str {
        &self.payload.file_name
    }
}

/// Read and validate a local PDF.
///
/// # Errors
/// `FileNotFound`, `PermissionDenied` or `NotAPdf`.
pub async fn load_document(path: &Path) -> Result<SourceDocument, Pdf2MdError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(Pdf2MdError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(Pdf2MdError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    check_magic(path, &bytes)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    debug!("Loaded {} ({} bytes)", path.display(), bytes.len());

    Ok(SourceDocument {
        path: path.to_path_buf(),
        stem,
        payload: DocumentPayload {
            file_name,
            bytes: Bytes::from(bytes),
        },
    })
}

fn check_magic(path: &Path, bytes: &[u8]) -> Result<(), Pdf2MdError> {
    if bytes.starts_with(PDF_MAGIC) {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    Err(Pdf2MdError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}
