//! Page-count discovery.
//!
//! The content range needs the total page count before anything billable is
//! submitted. Counting locally with pdfium is free, so it is tried first. When
//! the pdfium library is not installed, or cannot parse the file, a probe job
//! converts page 0 only and the count is read back from the reported
//! metadata. That costs one page of credit.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library behind a synchronous FFI; opening a thousand-page
//! textbook can take a noticeable fraction of a second and must not stall a
//! Tokio worker thread.

use crate::config::ConversionConfig;
use crate::error::{DocumentDefect, Pdf2MdError};
use crate::pipeline::client::{ConversionClient, ConversionJob};
use crate::pipeline::input::SourceDocument;
use crate::progress::JobTicket;
use bytes::Bytes;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit pdfium shared library (or the
/// directory containing it).
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_LIB_PATH";

/// Where the page count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCountSource {
    Local,
    Probe,
}

/// Determine the total page count of `document`.
///
/// # Errors
/// * `InvalidDocument { NoPages }` if the document reports zero pages.
/// * `InvalidDocument { PageCountUnknown }` if the probe completes without a
///   usable count.
/// * Any submission or polling error raised by the probe job itself.
pub async fn count_pages(
    document: &SourceDocument,
    client: &ConversionClient<'_>,
    config: &ConversionConfig,
) -> Result<(usize, PageCountSource), Pdf2MdError> {
    if config.local_page_count {
        match local_page_count(document.payload.bytes.clone()).await {
            Ok(0) => {
                return Err(Pdf2MdError::InvalidDocument {
                    path: document.path.clone(),
                    defect: DocumentDefect::NoPages,
                });
            }
            Ok(n) => {
                debug!("{}: {} pages (pdfium)", document.file_name(), n);
                return Ok((n, PageCountSource::Local));
            }
            Err(reason) => {
                warn!(
                    "{}: local page count unavailable ({}); submitting a probe job",
                    document.file_name(),
                    reason
                );
            }
        }
    }

    let mut probe = ConversionJob::probe(JobTicket::probe(document.file_name()));
    let result = client.submit_and_wait(&document.payload, &mut probe).await?;

    match result.reported_page_count() {
        Some(n) => {
            info!("{}: {} pages (probe)", document.file_name(), n);
            Ok((n, PageCountSource::Probe))
        }
        None => Err(Pdf2MdError::InvalidDocument {
            path: document.path.clone(),
            defect: DocumentDefect::PageCountUnknown,
        }),
    }
}

/// Count pages with pdfium on the blocking pool.
async fn local_page_count(bytes: Bytes) -> Result<usize, String> {
    tokio::task::spawn_blocking(move || local_page_count_blocking(&bytes))
        .await
        .map_err(|e| format!("page count task panicked: {e}"))?
}

fn local_page_count_blocking(bytes: &[u8]) -> Result<usize, String> {
    let pdfium = Pdfium::new(bind_pdfium()?);
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| format!("{e:?}"))?;
    let pages = document.pages().len() as usize;
    Ok(pages)
}

fn bind_pdfium() -> Result<Box<dyn PdfiumLibraryBindings>, String> {
    match std::env::var(PDFIUM_LIB_ENV) {
        Ok(path) if !path.trim().is_empty() => Pdfium::bind_to_library(&path)
            .or_else(|_| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
            })
            .map_err(|e| format!("{PDFIUM_LIB_ENV}={path}: {e:?}")),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| format!("pdfium library not found: {e:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialPool;
    use crate::pipeline::service::{
        CheckReply, ConversionService, DocumentPayload, ServiceError, SubmitReply, SubmitRequest,
    };
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::time::Duration;

    struct ProbeService {
        metadata: serde_json::Value,
    }

    #[async_trait]
    impl ConversionService for ProbeService {
        async fn submit(&self, request: &SubmitRequest, _: &str) -> Result<SubmitReply, ServiceError> {
            assert_eq!(request.page_range.as_deref(), Some("0"));
            assert!(!request.use_llm);
            Ok(SubmitReply::Accepted {
                check_url: "https://svc/check/probe".into(),
            })
        }

        async fn check(&self, _: &str, _: &str) -> Result<CheckReply, ServiceError> {
            Ok(CheckReply {
                status: "complete".into(),
                markdown: Some("# Title page".into()),
                metadata: self.metadata.as_object().cloned(),
                ..Default::default()
            })
        }
    }

    fn document() -> SourceDocument {
        SourceDocument {
            path: PathBuf::from("/books/cardio.pdf"),
            stem: "cardio".into(),
            payload: DocumentPayload {
                file_name: "cardio.pdf".into(),
                bytes: Bytes::from_static(b"%PDF-1.7"),
            },
        }
    }

    fn probe_only_config() -> ConversionConfig {
        ConversionConfig::builder()
            .local_page_count(false)
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn probe_reads_page_count_from_metadata() {
        let service = ProbeService {
            metadata: serde_json::json!({"page_stats": [], "pages": 947}),
        };
        let pool = CredentialPool::new(["k1"]).unwrap();
        let config = probe_only_config();
        let client = ConversionClient::new(&service, &pool, &config);

        let (pages, source) = count_pages(&document(), &client, &config).await.unwrap();
        assert_eq!(pages, 947);
        assert_eq!(source, PageCountSource::Probe);
    }

    #[tokio::test]
    async fn probe_without_count_is_page_count_unknown() {
        let service = ProbeService {
            metadata: serde_json::json!({"languages": ["en"]}),
        };
        let pool = CredentialPool::new(["k1"]).unwrap();
        let config = probe_only_config();
        let client = ConversionClient::new(&service, &pool, &config);

        let err = count_pages(&document(), &client, &config).await.unwrap_err();
        assert!(matches!(
            err,
            Pdf2MdError::InvalidDocument {
                defect: DocumentDefect::PageCountUnknown,
                ..
            }
        ));
    }
}
