//! Orchestration tests against an in-process conversion service.
//!
//! `FakeMarker` plays the remote API: it refuses configured keys with 402,
//! echoes the submitted page range into the body, reports the page count for
//! a page-0 probe, and can be told to fail or stall a given range. Nothing
//! here touches the network or needs libpdfium.

use async_trait::async_trait;
use medbook_pdf2md::pipeline::service::{
    CheckReply, ConversionService, ServiceError, SubmitReply, SubmitRequest,
};
use medbook_pdf2md::{
    convert, convert_to_file, plan, ConversionConfig, CredentialPool, Pdf2MdError, Recovery,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Fake service ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeMarker {
    total_pages: usize,
    exhausted_keys: Vec<&'static str>,
    fail_range: Option<&'static str>,
    /// Status checks answered "processing" before "complete".
    slow_checks: u32,
    /// Range that stays "processing" forever.
    stalled_range: Option<&'static str>,
    log: Mutex<Log>,
}

#[derive(Default)]
struct Log {
    /// (page_range, key) for every submission, accepted or not.
    submissions: Vec<(String, String)>,
    /// (job id, key) for every status check.
    checks: Vec<(String, String)>,
    polls: HashMap<String, u32>,
}

impl FakeMarker {
    fn book(total_pages: usize) -> Self {
        Self {
            total_pages,
            ..Default::default()
        }
    }

    fn submitted_ranges(&self) -> Vec<String> {
        let log = self.log.lock().unwrap();
        log.submissions.iter().map(|(r, _)| r.clone()).collect()
    }

    fn submissions(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().submissions.clone()
    }

    fn checks(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().checks.clone()
    }
}

#[async_trait]
impl ConversionService for FakeMarker {
    async fn submit(
        &self,
        request: &SubmitRequest,
        credential: &str,
    ) -> Result<SubmitReply, ServiceError> {
        let range = request.page_range.clone().unwrap_or_else(|| "all".into());
        self.log
            .lock()
            .unwrap()
            .submissions
            .push((range.clone(), credential.to_string()));

        if self.exhausted_keys.iter().any(|k| *k == credential) {
            return Ok(SubmitReply::CredentialRejected {
                status: 402,
                detail: "Payment Required".into(),
            });
        }
        Ok(SubmitReply::Accepted {
            check_url: format!("https://fake.marker/check/{range}"),
        })
    }

    async fn check(&self, check_url: &str, credential: &str) -> Result<CheckReply, ServiceError> {
        let id = check_url.rsplit('/').next().unwrap_or_default().to_string();
        let polls = {
            let mut log = self.log.lock().unwrap();
            log.checks.push((id.clone(), credential.to_string()));
            let n = log.polls.entry(id.clone()).or_default();
            *n += 1;
            *n
        };

        if self.stalled_range.is_some_and(|r| r == id) || polls <= self.slow_checks {
            return Ok(CheckReply {
                status: "processing".into(),
                ..Default::default()
            });
        }
        if self.fail_range.is_some_and(|f| f == id) {
            return Ok(CheckReply {
                status: "failed".into(),
                error: Some(format!("could not convert {id}")),
                ..Default::default()
            });
        }

        let mut metadata = serde_json::Map::new();
        if id == "0" {
            metadata.insert("pages".into(), serde_json::json!(self.total_pages));
        }
        let mut images = BTreeMap::new();
        images.insert(format!("fig_{id}.png"), "aGk=".to_string());

        Ok(CheckReply {
            status: "complete".into(),
            markdown: Some(format!("Body {id}\n\n\n\n\nend {id}")),
            images: Some(images),
            metadata: Some(metadata),
            ..Default::default()
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n%%EOF\n").unwrap();
    path
}

fn config_for(fake: &Arc<FakeMarker>) -> medbook_pdf2md::ConversionConfigBuilder {
    init_tracing();
    ConversionConfig::builder()
        .service(Arc::clone(fake) as Arc<dyn ConversionService>)
        .local_page_count(false)
        .poll_interval(Duration::ZERO)
        .poll_error_delay(Duration::ZERO)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_job_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = write_pdf(dir.path(), "cardio.pdf");
    let output = dir.path().join("parsed").join("cardio_content.md");

    let fake = Arc::new(FakeMarker {
        slow_checks: 2,
        ..FakeMarker::book(100)
    });
    let pool = CredentialPool::new(["key-one"]).unwrap();
    let config = config_for(&fake).build().unwrap();

    let stats = convert_to_file(&input, &output, &pool, &config).await.unwrap();

    assert_eq!(fake.submitted_ranges(), ["0", "1-91"]);
    assert_eq!(stats.total_pages, 100);
    assert_eq!(stats.content_pages, 91);
    assert_eq!(stats.jobs, 1);
    assert_eq!(stats.images, 1);
    assert_eq!(stats.credential_rotations, 0);

    let md = std::fs::read_to_string(&output).unwrap();
    assert_eq!(
        md,
        "# cardio\n\n**Source:** cardio.pdf\n**Pages Parsed:** 1-91 (0-indexed)\n\
         **Total Pages:** 91\n\n---\n\nBody 1-91\n\nend 1-91"
    );
    let image = dir.path().join("parsed/cardio_content_images/fig_1-91.png");
    assert_eq!(std::fs::read(image).unwrap(), b"hi");
}

#[tokio::test]
async fn long_book_is_split_across_two_keys_and_merged_in_order() {
    let dir = TempDir::new().unwrap();
    let input = write_pdf(dir.path(), "harrison.pdf");

    let fake = Arc::new(FakeMarker::book(1200));
    let pool = CredentialPool::new(["key-a", "key-b"]).unwrap();
    let config = config_for(&fake)
        .max_pages_per_credential(600)
        .build()
        .unwrap();

    let output = convert(&input, &pool, &config).await.unwrap();

    // 16-1098 is 1083 pages: 541 + 542.
    assert_eq!(output.plan.jobs.len(), 2);
    assert_eq!(
        fake.submissions(),
        [
            ("0".to_string(), "key-a".to_string()),
            ("16-556".to_string(), "key-a".to_string()),
            ("557-1098".to_string(), "key-b".to_string()),
        ]
    );
    let first = output.result.markdown.find("Body 16-556").unwrap();
    let second = output.result.markdown.find("Body 557-1098").unwrap();
    assert!(first < second);
    assert_eq!(output.result.images.len(), 2);
    assert_eq!(output.stats.credential_rotations, 1);
}

#[tokio::test]
async fn exhausted_key_is_skipped_and_rotation_carries_into_the_next_book() {
    let dir = TempDir::new().unwrap();
    let first = write_pdf(dir.path(), "anatomy.pdf");
    let second = write_pdf(dir.path(), "physiology.pdf");

    let fake = Arc::new(FakeMarker {
        exhausted_keys: vec!["key-a"],
        ..FakeMarker::book(200)
    });
    let pool = CredentialPool::new(["key-a", "key-b", "key-c"]).unwrap();
    let config = config_for(&fake).build().unwrap();

    convert_to_file(&first, dir.path().join("a.md"), &pool, &config)
        .await
        .unwrap();
    convert_to_file(&second, dir.path().join("p.md"), &pool, &config)
        .await
        .unwrap();

    let keys: Vec<String> = fake.submissions().into_iter().map(|(_, k)| k).collect();
    assert_eq!(keys, ["key-a", "key-b", "key-b", "key-b", "key-b"]);
    assert!(fake.checks().iter().all(|(_, k)| k == "key-b"));
    assert_eq!(pool.current().expose(), "key-b");
}

#[tokio::test]
async fn all_keys_exhausted_fails_without_output() {
    let dir = TempDir::new().unwrap();
    let input = write_pdf(dir.path(), "cardio.pdf");
    let output = dir.path().join("cardio_content.md");

    let fake = Arc::new(FakeMarker {
        exhausted_keys: vec!["key-a", "key-b"],
        ..FakeMarker::book(100)
    });
    let pool = CredentialPool::new(["key-a", "key-b"]).unwrap();
    let config = config_for(&fake).build().unwrap();

    let err = convert_to_file(&input, &output, &pool, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2MdError::CredentialsExhausted { attempts: 2, .. }));
    assert_eq!(err.recovery(), Recovery::NeedsIntervention);
    assert_eq!(fake.submissions().len(), 2);
    assert!(!output.exists());
}

#[tokio::test]
async fn failing_chunk_discards_the_document_and_leaves_earlier_outputs_alone() {
    let dir = TempDir::new().unwrap();
    let done = dir.path().join("earlier_content.md");
    std::fs::write(&done, "earlier book").unwrap();
    let input = write_pdf(dir.path(), "harrison.pdf");
    let output = dir.path().join("harrison_content.md");

    let fake = Arc::new(FakeMarker {
        fail_range: Some("557-1098"),
        ..FakeMarker::book(1200)
    });
    let pool = CredentialPool::new(["key-a", "key-b"]).unwrap();
    let config = config_for(&fake)
        .max_pages_per_credential(600)
        .build()
        .unwrap();

    let err = convert_to_file(&input, &output, &pool, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2MdError::ProcessingFailed { .. }));
    assert!(!output.exists());
    assert!(!dir.path().join("harrison_content_images").exists());
    assert_eq!(std::fs::read_to_string(&done).unwrap(), "earlier book");
}

#[tokio::test]
async fn stalled_job_times_out_without_touching_outputs() {
    let dir = TempDir::new().unwrap();
    let done = dir.path().join("earlier_content.md");
    std::fs::write(&done, "earlier book").unwrap();
    let input = write_pdf(dir.path(), "cardio.pdf");
    let output = dir.path().join("cardio_content.md");

    let fake = Arc::new(FakeMarker {
        stalled_range: Some("1-91"),
        ..FakeMarker::book(100)
    });
    let pool = CredentialPool::new(["key-a"]).unwrap();
    let config = config_for(&fake).max_polls(5).build().unwrap();

    let err = convert_to_file(&input, &output, &pool, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2MdError::Timeout { polls: 5, .. }));
    assert_eq!(err.recovery(), Recovery::NeedsIntervention);
    assert_eq!(fake.submitted_ranges(), ["0", "1-91"]);
    assert!(!output.exists());
    assert!(!dir.path().join("cardio_content_images").exists());
    assert_eq!(std::fs::read_to_string(&done).unwrap(), "earlier book");
}

#[tokio::test]
async fn failure_on_third_check_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let input = write_pdf(dir.path(), "cardio.pdf");
    let output = dir.path().join("cardio_content.md");

    let fake = Arc::new(FakeMarker {
        slow_checks: 2,
        fail_range: Some("1-91"),
        ..FakeMarker::book(100)
    });
    let pool = CredentialPool::new(["key-a"]).unwrap();
    let config = config_for(&fake).build().unwrap();

    let err = convert_to_file(&input, &output, &pool, &config)
        .await
        .unwrap_err();

    match err {
        Pdf2MdError::ProcessingFailed { detail } => assert!(detail.contains("1-91")),
        other => panic!("expected ProcessingFailed, got {other:?}"),
    }
    let content_checks = fake.checks().iter().filter(|(id, _)| id == "1-91").count();
    assert_eq!(content_checks, 3);
    assert!(!output.exists());
    assert!(!dir.path().join("cardio_content_images").exists());
}

#[tokio::test]
async fn short_document_is_rejected_before_paid_work() {
    let dir = TempDir::new().unwrap();
    let input = write_pdf(dir.path(), "leaflet.pdf");

    let fake = Arc::new(FakeMarker::book(8));
    let pool = CredentialPool::new(["key-a"]).unwrap();
    let config = config_for(&fake).build().unwrap();

    let err = convert(&input, &pool, &config).await.unwrap_err();
    assert!(matches!(err, Pdf2MdError::InvalidRange { total_pages: 8, .. }));
    assert_eq!(fake.submitted_ranges(), ["0"]);
}

#[tokio::test]
async fn not_a_pdf_never_reaches_the_service() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("scan.pdf");
    std::fs::write(&input, b"\x89PNG\r\n").unwrap();

    let fake = Arc::new(FakeMarker::book(100));
    let pool = CredentialPool::new(["key-a"]).unwrap();
    let config = config_for(&fake).build().unwrap();

    let err = convert(&input, &pool, &config).await.unwrap_err();
    assert!(matches!(err, Pdf2MdError::NotAPdf { .. }));
    assert!(fake.submissions().is_empty());
}

#[tokio::test]
async fn dry_run_plans_without_converting() {
    let dir = TempDir::new().unwrap();
    let input = write_pdf(dir.path(), "harrison.pdf");

    let fake = Arc::new(FakeMarker::book(1200));
    let pool = CredentialPool::new(["key-a", "key-b"]).unwrap();
    let config = config_for(&fake)
        .max_pages_per_credential(600)
        .use_llm(true)
        .build()
        .unwrap();

    let plan = plan(&input, &pool, &config).await.unwrap();

    assert_eq!(plan.total_pages, 1200);
    assert_eq!((plan.content_range.start, plan.content_range.end), (16, 1098));
    assert_eq!(plan.jobs.len(), 2);
    assert!((plan.estimated_cost_usd - 1083.0 * 0.006).abs() < 1e-9);
    assert_eq!(fake.submitted_ranges(), ["0"]);
}
