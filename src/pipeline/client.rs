//! Submit one page range to the service and poll it to a terminal state.
//!
//! ## Submission
//!
//! The active credential from the pool goes into the request header. A
//! credential-exhaustion reply (401/402/403) rotates the pool and resubmits,
//! at most once per credential; a pool that has been walked all the way round
//! yields `CredentialsExhausted`. Any other rejection, and any connection
//! failure, ends the job immediately: those are not transient at this layer
//! (HTTP 429 was already retried by the sending layer).
//!
//! ## Polling
//!
//! A fixed-interval loop, bounded by `max_polls`, using the credential that
//! was accepted at submission time. A failed status check is logged and
//! absorbed after an extra delay; it still counts against the poll budget so
//! a dead endpoint cannot hold the loop open forever.

use crate::config::ConversionConfig;
use crate::credentials::{Credential, CredentialPool};
use crate::error::Pdf2MdError;
use crate::output::ConversionResult;
use crate::pipeline::range::PageRange;
use crate::pipeline::service::{
    ConversionService, DocumentPayload, JobStatus, ServiceError, SubmitReply, SubmitRequest,
};
use crate::progress::JobTicket;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Lifecycle of a [`ConversionJob`]. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Submitted,
    Polling,
    Complete,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed | JobState::TimedOut)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Submitted => 1,
            JobState::Polling => 2,
            JobState::Complete | JobState::Failed | JobState::TimedOut => 3,
        }
    }
}

/// Which pages a job asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPages {
    /// A single-page job whose only purpose is the page count in its metadata.
    Probe,
    Range(PageRange),
}

/// One submit-and-poll cycle. Failure is terminal; a retry is a new job.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub ticket: JobTicket,
    pub pages: JobPages,
    state: JobState,
}

impl ConversionJob {
    pub fn for_range(ticket: JobTicket, range: PageRange) -> Self {
        Self {
            ticket,
            pages: JobPages::Range(range),
            state: JobState::Pending,
        }
    }

    pub fn probe(ticket: JobTicket) -> Self {
        Self {
            ticket,
            pages: JobPages::Probe,
            state: JobState::Pending,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next` if it is further along the lifecycle. Returns whether
    /// the state changed.
    fn advance(&mut self, next: JobState) -> bool {
        if next.rank() > self.state.rank() {
            debug!("{}: {:?} → {:?}", self.ticket.id, self.state, next);
            self.state = next;
            true
        } else {
            false
        }
    }

    fn describe_pages(&self) -> String {
        match self.pages {
            JobPages::Probe => "probe".to_string(),
            JobPages::Range(r) => format!("pages {r}"),
        }
    }
}

/// Drives jobs against a [`ConversionService`] using a shared [`CredentialPool`].
pub struct ConversionClient<'a> {
    service: &'a dyn ConversionService,
    pool: &'a CredentialPool,
    config: &'a ConversionConfig,
    polls: AtomicU32,
    rotations: AtomicUsize,
}

impl<'a> ConversionClient<'a> {
    pub fn new(
        service: &'a dyn ConversionService,
        pool: &'a CredentialPool,
        config: &'a ConversionConfig,
    ) -> Self {
        Self {
            service,
            pool,
            config,
            polls: AtomicU32::new(0),
            rotations: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        self.pool
    }

    /// Status checks issued so far by this client.
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    /// Pool rotations triggered through this client.
    pub fn rotations(&self) -> usize {
        self.rotations.load(Ordering::SeqCst)
    }

    /// Advance the credential pool and report it.
    pub fn rotate(&self, reason: &str) -> &Credential {
        let from = self.pool.position();
        let credential = self.pool.rotate();
        let to = self.pool.position();
        self.rotations.fetch_add(1, Ordering::SeqCst);
        info!(
            "Rotating API key #{} → #{} ({}) [{}]",
            from + 1,
            to + 1,
            credential.masked(),
            reason
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_credential_rotated(from, to, reason);
        }
        credential
    }

    /// Submit `job` and wait for its result.
    ///
    /// # Errors
    /// `CredentialsExhausted`, `SubmissionRejected`, `Transport`,
    /// `RateLimited`, `ProcessingFailed` or `Timeout`. The job is left in a
    /// terminal state either way.
    pub async fn submit_and_wait(
        &self,
        document: &DocumentPayload,
        job: &mut ConversionJob,
    ) -> Result<ConversionResult, Pdf2MdError> {
        let started = Instant::now();
        let outcome = self.run(document, job, started).await;

        if let Err(ref e) = outcome {
            job.advance(JobState::Failed);
            warn!("{}: {}", job.ticket.id, e);
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_job_failed(&job.ticket, started.elapsed(), &e.to_string());
            }
        }
        outcome
    }

    async fn run(
        &self,
        document: &DocumentPayload,
        job: &mut ConversionJob,
        started: Instant,
    ) -> Result<ConversionResult, Pdf2MdError> {
        let request = self.build_request(document, job)?;
        let (check_url, credential) = self.submit(&request, job).await?;
        self.wait(&check_url, &credential, job, started).await
    }

    fn build_request(
        &self,
        document: &DocumentPayload,
        job: &ConversionJob,
    ) -> Result<SubmitRequest, Pdf2MdError> {
        let (page_range, use_llm) = match job.pages {
            JobPages::Probe => (Some("0".to_string()), false),
            JobPages::Range(range) => {
                if range.start >= range.end {
                    return Err(Pdf2MdError::Internal(format!(
                        "{}: refusing to submit degenerate range {}",
                        job.ticket.id, range
                    )));
                }
                (Some(range.to_form_value()), self.config.use_llm)
            }
        };

        Ok(SubmitRequest {
            document: document.clone(),
            output_format: self.config.output_format,
            use_llm,
            paginate: self.config.paginate,
            page_range,
            additional_config: self.config.additional_config(),
        })
    }

    /// Submission phase: returns the check URL and the credential that was
    /// accepted.
    async fn submit(
        &self,
        request: &SubmitRequest,
        job: &mut ConversionJob,
    ) -> Result<(String, Credential), Pdf2MdError> {
        let attempts = self.pool.len();
        let mut last_status = 0u16;
        let mut last_detail = String::new();

        for attempt in 1..=attempts {
            let credential = self.pool.current().clone();
            info!(
                "Submitting {} ({}) [key {}]",
                job.ticket.id,
                job.describe_pages(),
                credential.masked()
            );

            let reply = self
                .service
                .submit(request, credential.expose())
                .await
                .map_err(|e| match e {
                    ServiceError::RateLimited { attempts } => Pdf2MdError::RateLimited { attempts },
                    ServiceError::Transport(detail) => Pdf2MdError::Transport { detail },
                    ServiceError::Decode(detail) => Pdf2MdError::SubmissionRejected {
                        status: 200,
                        detail,
                    },
                })?;

            match reply {
                SubmitReply::Accepted { check_url } => {
                    job.advance(JobState::Submitted);
                    debug!("{}: accepted, check URL {}", job.ticket.id, check_url);
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_job_submitted(&job.ticket, &credential.masked());
                    }
                    return Ok((check_url, credential));
                }
                SubmitReply::CredentialRejected { status, detail } => {
                    warn!(
                        "{}: key {} refused with HTTP {} ({}/{}): {}",
                        job.ticket.id,
                        credential.masked(),
                        status,
                        attempt,
                        attempts,
                        detail
                    );
                    last_status = status;
                    last_detail = detail;
                    if attempts > 1 {
                        self.rotate(&format!("HTTP {status}"));
                    }
                }
                SubmitReply::Rejected { status, detail } => {
                    return Err(Pdf2MdError::SubmissionRejected { status, detail });
                }
            }
        }

        Err(Pdf2MdError::CredentialsExhausted {
            attempts,
            last_status,
            detail: last_detail,
        })
    }

    /// Polling phase.
    async fn wait(
        &self,
        check_url: &str,
        credential: &Credential,
        job: &mut ConversionJob,
        started: Instant,
    ) -> Result<ConversionResult, Pdf2MdError> {
        job.advance(JobState::Polling);
        let max_polls = self.config.max_polls;
        let format = self.config.output_format;

        for poll in 1..=max_polls {
            sleep(self.config.poll_interval).await;
            self.polls.fetch_add(1, Ordering::SeqCst);

            let reply = match self.service.check(check_url, credential.expose()).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(
                        "{}: polling error on check {}/{}: {}",
                        job.ticket.id, poll, max_polls, e
                    );
                    sleep(self.config.poll_error_delay).await;
                    continue;
                }
            };

            match reply.job_status() {
                JobStatus::Complete => {
                    let Some(markdown) = reply.body(format) else {
                        return Err(Pdf2MdError::ProcessingFailed {
                            detail: format!(
                                "service reported complete but sent no '{}' field",
                                format.as_str()
                            ),
                        });
                    };
                    job.advance(JobState::Complete);
                    let elapsed = started.elapsed();
                    info!(
                        "Completed {} ({}) in {:.1}s",
                        job.ticket.id,
                        job.describe_pages(),
                        elapsed.as_secs_f64()
                    );
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_job_complete(&job.ticket, elapsed, markdown.len());
                    }
                    return Ok(ConversionResult {
                        markdown,
                        images: reply.images.unwrap_or_default(),
                        metadata: reply.metadata.unwrap_or_default(),
                    });
                }
                JobStatus::Failed => {
                    return Err(Pdf2MdError::ProcessingFailed {
                        detail: reply.error.unwrap_or_else(|| "Unknown error".to_string()),
                    });
                }
                JobStatus::InProgress(status) => {
                    let elapsed = started.elapsed();
                    if poll % 10 == 1 {
                        info!(
                            "{}: still {} ({}s elapsed)",
                            job.ticket.id,
                            status,
                            elapsed.as_secs()
                        );
                    }
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_job_polling(&job.ticket, poll, elapsed);
                    }
                }
            }
        }

        job.advance(JobState::TimedOut);
        Err(Pdf2MdError::Timeout {
            polls: max_polls,
            elapsed_secs: started.elapsed().as_secs(),
        })
    }
}
