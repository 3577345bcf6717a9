//! Transport to the remote conversion service.
//!
//! [`ConversionService`] is the seam between orchestration and HTTP. The
//! client never sees status codes for rate limiting: the sending layer
//! ([`HttpConversionService`]) retries HTTP 429 with bounded exponential
//! backoff and only surfaces [`ServiceError::RateLimited`] once the budget is
//! spent. Everything else about a submission is classified into a
//! [`SubmitReply`] so the client can decide between rotating credentials and
//! giving up.
//!
//! ## Wire contract
//!
//! ```text
//! POST <api_url>            multipart, header X-Api-Key
//!   200 {request_check_url}       → Accepted
//!   401 / 402 / 403               → CredentialRejected
//!   other                         → Rejected
//! GET  <request_check_url>  header X-Api-Key
//!   {status, markdown?, images?, metadata?, error?}
//! ```

use crate::config::{OutputFormat, RetryPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RETRY_AFTER;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Header carrying the credential on every request.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// A PDF ready to be uploaded.
#[derive(Debug, Clone)]
pub struct DocumentPayload {
    /// File name sent in the multipart part, e.g. `harrison.pdf`.
    pub file_name: String,
    pub bytes: Bytes,
}

/// Everything the service needs for one submission, minus the credential.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub document: DocumentPayload,
    pub output_format: OutputFormat,
    pub use_llm: bool,
    pub paginate: bool,
    /// `"<start>-<end>"`, a single page such as `"0"`, or `None` for all pages.
    pub page_range: Option<String>,
    pub additional_config: Option<serde_json::Value>,
}

/// Classified outcome of a submission that reached the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitReply {
    /// HTTP 200; poll `check_url` for the result.
    Accepted { check_url: String },
    /// HTTP 401/402/403; the credential is out of credit or invalid.
    CredentialRejected { status: u16, detail: String },
    /// Any other non-200 response.
    Rejected { status: u16, detail: String },
}

/// Status reported by a check request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Complete,
    Failed,
    /// Anything else the service says while it is still working.
    InProgress(String),
}

/// Body of a check response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckReply {
    pub status: String,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub json: Option<serde_json::Value>,
    /// Image file name → base64 bytes.
    #[serde(default)]
    pub images: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CheckReply {
    pub fn job_status(&self) -> JobStatus {
        match self.status.as_str() {
            "complete" => JobStatus::Complete,
            "failed" => JobStatus::Failed,
            other => JobStatus::InProgress(other.to_string()),
        }
    }

    /// The converted body for the requested format, if the service sent one.
    pub fn body(&self, format: OutputFormat) -> Option<String> {
        match format {
            OutputFormat::Markdown => self.markdown.clone(),
            OutputFormat::Html => self.html.clone(),
            OutputFormat::Json => self
                .json
                .as_ref()
                .and_then(|v| serde_json::to_string_pretty(v).ok()),
        }
    }
}

/// Failures below the level of a classified reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Still HTTP 429 after the whole retry budget.
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    /// Connection refused, reset, DNS failure, timeout.
    #[error("transport: {0}")]
    Transport(String),
    /// The service answered with something that is not the expected JSON.
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// The remote conversion service.
#[async_trait]
pub trait ConversionService: Send + Sync {
    /// Upload a document and start a conversion job.
    async fn submit(
        &self,
        request: &SubmitRequest,
        credential: &str,
    ) -> Result<SubmitReply, ServiceError>;

    /// Ask for the status of a previously accepted job.
    async fn check(&self, check_url: &str, credential: &str) -> Result<CheckReply, ServiceError>;
}

// ── HTTP implementation ──────────────────────────────────────────────────

/// [`ConversionService`] over HTTPS using `reqwest`.
pub struct HttpConversionService {
    api_url: String,
    client: reqwest::Client,
    rate_limit: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    request_check_url: String,
}

impl HttpConversionService {
    pub fn new(
        api_url: impl Into<String>,
        timeout_secs: u64,
        rate_limit: RetryPolicy,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            api_url: api_url.into(),
            client,
            rate_limit,
        })
    }

    fn build_form(request: &SubmitRequest) -> Result<Form, ServiceError> {
        let doc = &request.document;
        let file = Part::stream_with_length(Body::from(doc.bytes.clone()), doc.bytes.len() as u64)
            .file_name(doc.file_name.clone())
            .mime_str("application/pdf")
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let mut form = Form::new()
            .part("file", file)
            .text("output_format", request.output_format.as_str())
            .text("use_llm", request.use_llm.to_string())
            .text("force_ocr", "false")
            .text("paginate", request.paginate.to_string())
            .text("strip_existing_ocr", "false")
            .text("disable_image_extraction", "false");

        if let Some(ref range) = request.page_range {
            form = form.text("page_range", range.clone());
        }
        if let Some(ref extra) = request.additional_config {
            form = form.text("additional_config", extra.to_string());
        }
        Ok(form)
    }
}

#[async_trait]
impl ConversionService for HttpConversionService {
    async fn submit(
        &self,
        request: &SubmitRequest,
        credential: &str,
    ) -> Result<SubmitReply, ServiceError> {
        let client = &self.client;
        let url = self.api_url.as_str();
        let response = send_with_backoff(&self.rate_limit, move || async move {
            let form = Self::build_form(request)?;
            client
                .post(url)
                .header(API_KEY_HEADER, credential)
                .multipart(form)
                .send()
                .await
                .map_err(|e| ServiceError::Transport(e.to_string()))
        })
        .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        classify_submit(status.as_u16(), &body)
    }

    async fn check(&self, check_url: &str, credential: &str) -> Result<CheckReply, ServiceError> {
        let client = &self.client;
        let response = send_with_backoff(&self.rate_limit, move || async move {
            client
                .get(check_url)
                .header(API_KEY_HEADER, credential)
                .send()
                .await
                .map_err(|e| ServiceError::Transport(e.to_string()))
        })
        .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ServiceError::Decode(format!("HTTP {status}: {}", truncate(&body))));
        }
        parse_check(&body)
    }
}

/// Classify a submission response by status code.
pub fn classify_submit(status: u16, body: &str) -> Result<SubmitReply, ServiceError> {
    match status {
        200 => {
            let parsed: SubmitResponse = serde_json::from_str(body)
                .map_err(|e| ServiceError::Decode(format!("{e}: {}", truncate(body))))?;
            Ok(SubmitReply::Accepted {
                check_url: parsed.request_check_url,
            })
        }
        401..=403 => Ok(SubmitReply::CredentialRejected {
            status,
            detail: truncate(body),
        }),
        _ => Ok(SubmitReply::Rejected {
            status,
            detail: truncate(body),
        }),
    }
}

/// Parse the body of a check response.
pub fn parse_check(body: &str) -> Result<CheckReply, ServiceError> {
    serde_json::from_str(body).map_err(|e| ServiceError::Decode(format!("{e}: {}", truncate(body))))
}

/// Run `send` until it returns something other than HTTP 429 or the policy's
/// attempt budget is spent.
async fn send_with_backoff<F, Fut>(
    policy: &RetryPolicy,
    mut send: F,
) -> Result<reqwest::Response, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, ServiceError>>,
{
    for attempt in 1..=policy.max_attempts {
        let response = send().await?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if attempt == policy.max_attempts {
            break;
        }
        let delay = retry_after(&response).unwrap_or_else(|| policy.delay_for(attempt));
        warn!(
            "HTTP 429 (attempt {}/{}); backing off {:?}",
            attempt, policy.max_attempts, delay
        );
        sleep(delay).await;
    }
    Err(ServiceError::RateLimited {
        attempts: policy.max_attempts,
    })
}

/// `Retry-After` in whole seconds; HTTP-date values are ignored.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    let secs: u64 = value.trim().parse().ok()?;
    debug!("Service asked to retry after {}s", secs);
    Some(Duration::from_secs(secs))
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 300;
    if body.len() <= LIMIT {
        return body.trim().to_string();
    }
    let mut cut = LIMIT;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", body[..cut].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_accepted() {
        let reply = classify_submit(
            200,
            r#"{"success":true,"request_id":"abc","request_check_url":"https://svc/check/abc"}"#,
        )
        .unwrap();
        assert_eq!(
            reply,
            SubmitReply::Accepted {
                check_url: "https://svc/check/abc".into()
            }
        );
    }

    #[test]
    fn classify_accepted_without_url_is_decode_error() {
        let err = classify_submit(200, r#"{"success":true}"#).unwrap_err();
        assert!(matches!(err, ServiceError::Decode(_)));
    }

    #[test]
    fn classify_credential_statuses() {
        for status in [401, 402, 403] {
            let reply = classify_submit(status, "Payment Required").unwrap();
            assert!(
                matches!(reply, SubmitReply::CredentialRejected { status: s, .. } if s == status),
                "{status}"
            );
        }
    }

    #[test]
    fn classify_other_rejections() {
        for status in [400, 404, 413, 422, 500] {
            let reply = classify_submit(status, "nope").unwrap();
            assert!(matches!(reply, SubmitReply::Rejected { .. }), "{status}");
        }
    }

    #[test]
    fn parse_complete_reply() {
        let reply = parse_check(
            r##"{"status":"complete","markdown":"# Cardiology","images":{"fig1.png":"aGk="},
                "metadata":{"pages":812},"success":true}"##,
        )
        .unwrap();
        assert_eq!(reply.job_status(), JobStatus::Complete);
        assert_eq!(reply.body(OutputFormat::Markdown).as_deref(), Some("# Cardiology"));
        assert_eq!(reply.images.unwrap()["fig1.png"], "aGk=");
        assert_eq!(reply.metadata.unwrap()["pages"], 812);
    }

    #[test]
    fn parse_in_progress_reply() {
        let reply = parse_check(r#"{"status":"processing"}"#).unwrap();
        assert_eq!(reply.job_status(), JobStatus::InProgress("processing".into()));
        assert!(reply.body(OutputFormat::Markdown).is_none());
    }

    #[test]
    fn parse_failed_reply() {
        let reply = parse_check(r#"{"status":"failed","error":"corrupt xref"}"#).unwrap();
        assert_eq!(reply.job_status(), JobStatus::Failed);
        assert_eq!(reply.error.as_deref(), Some("corrupt xref"));
    }

    #[test]
    fn json_body_is_pretty_printed() {
        let reply = parse_check(r#"{"status":"complete","json":{"children":[]}}"#).unwrap();
        let body = reply.body(OutputFormat::Json).unwrap();
        assert!(body.contains("\"children\""));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(400);
        let cut = truncate(&long);
        assert!(cut.ends_with('…'));
        assert!(cut.len() < long.len());
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            document: DocumentPayload {
                file_name: "book.pdf".into(),
                bytes: Bytes::from_static(b"%PDF-1.7"),
            },
            output_format: OutputFormat::Markdown,
            use_llm: false,
            paginate: false,
            page_range: Some("1-91".into()),
            additional_config: Some(serde_json::json!({"keep_pageheader_in_output": true})),
        }
    }

    #[test]
    fn form_includes_optional_fields() {
        let form = HttpConversionService::build_form(&request()).unwrap();
        assert!(!form.boundary().is_empty());
    }

    // ── HTTP behaviour against a local canned server ─────────────────────

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn response(status: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn too_many_requests() -> String {
        response("429 Too Many Requests", "", "slow down")
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    /// Serve `replies` in order, one per connection; the last one repeats.
    async fn serve(replies: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = &replies[n.min(replies.len() - 1)];
                read_request(&mut socket).await;
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (url, hits)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());
            match body_len {
                Some(len) if buf.len() >= end + 4 + len => return,
                Some(_) => continue,
                None if head.contains("transfer-encoding: chunked") => {
                    if buf.ends_with(b"0\r\n\r\n") {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    #[tokio::test]
    async fn check_gives_up_after_the_rate_limit_budget() {
        let (url, hits) = serve(vec![too_many_requests()]).await;
        let service = HttpConversionService::new(&url, 10, fast_policy(4)).unwrap();

        let err = service
            .check(&format!("{url}/check/1"), "key")
            .await
            .unwrap_err();

        assert_eq!(err, ServiceError::RateLimited { attempts: 4 });
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn submit_gives_up_after_the_rate_limit_budget() {
        let (url, hits) = serve(vec![too_many_requests()]).await;
        let service = HttpConversionService::new(&url, 10, fast_policy(3)).unwrap();

        let err = service.submit(&request(), "key").await.unwrap_err();

        assert_eq!(err, ServiceError::RateLimited { attempts: 3 });
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn submit_reports_exhausted_credential_without_retrying() {
        let (url, hits) = serve(vec![response("402 Payment Required", "", "no credit")]).await;
        let service = HttpConversionService::new(&url, 10, fast_policy(5)).unwrap();

        let reply = service.submit(&request(), "key").await.unwrap();

        assert!(matches!(
            reply,
            SubmitReply::CredentialRejected { status: 402, .. }
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submit_honours_retry_after_then_succeeds() {
        let (url, hits) = serve(vec![
            response("429 Too Many Requests", "Retry-After: 0\r\n", ""),
            response(
                "200 OK",
                "Content-Type: application/json\r\n",
                r#"{"request_check_url":"http://localhost/check/7"}"#,
            ),
        ])
        .await;
        // The policy alone would wait a minute; Retry-After: 0 overrides it.
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        let service = HttpConversionService::new(&url, 10, policy).unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(10), service.submit(&request(), "key"))
            .await
            .expect("Retry-After should override the policy delay")
            .unwrap();

        assert_eq!(
            reply,
            SubmitReply::Accepted {
                check_url: "http://localhost/check/7".into()
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
