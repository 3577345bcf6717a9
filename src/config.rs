//! Configuration types for textbook conversion.
//!
//! All orchestration behaviour is controlled through [`ConversionConfig`],
//! built via its [`ConversionConfigBuilder`]. The credential pool is *not*
//! part of the config: it carries mutable rotation state and is owned by the
//! calling workflow (see [`crate::credentials::CredentialPool`]).

use crate::error::Pdf2MdError;
use crate::pipeline::service::ConversionService;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default submit endpoint of the hosted Marker conversion API.
pub const DEFAULT_API_URL: &str = "https://www.datalab.to/api/v1/marker";

/// Smallest per-credential page budget the splitter accepts.
pub const MIN_PAGES_PER_CREDENTIAL: usize = 10;

/// Configuration for a textbook conversion.
///
/// # Example
/// ```rust
/// use medbook_pdf2md::ConversionConfig;
/// use std::time::Duration;
///
/// let config = ConversionConfig::builder()
///     .use_llm(true)
///     .max_pages_per_credential(800)
///     .poll_interval(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Submit endpoint. Default: [`DEFAULT_API_URL`].
    pub api_url: String,

    /// Format the service should produce. Default: Markdown.
    pub output_format: OutputFormat,

    /// Ask the service to run its LLM-assisted layout pass. Default: false.
    ///
    /// Roughly 50 % more expensive per page; see [`CostModel`].
    pub use_llm: bool,

    /// Ask the service to insert page delimiters. Default: false.
    pub paginate: bool,

    /// Keep running headers and footers in the output. Default: false.
    pub keep_headers_footers: bool,

    /// Front/back matter skip ratios. Default: [`SkipPolicy::default`].
    pub skip_policy: SkipPolicy,

    /// Page budget one credential can afford. Documents whose content range
    /// exceeds it are split across two credentials. Default: 1000.
    pub max_pages_per_credential: usize,

    /// Delay before each status check. Default: 3 s.
    pub poll_interval: Duration,

    /// Status checks allowed per job before giving up. Default: 1000.
    pub max_polls: u32,

    /// Extra delay after a failed status check. Default: 5 s.
    pub poll_error_delay: Duration,

    /// Backoff policy for HTTP 429 responses. Default: [`RetryPolicy::default`].
    pub rate_limit: RetryPolicy,

    /// Timeout for a single HTTP call in seconds. Default: 300.
    ///
    /// Uploads of 1 000-page textbooks can take minutes on slow links.
    pub request_timeout_secs: u64,

    /// Try counting pages locally with pdfium before falling back to a probe
    /// job on the service. Default: true.
    pub local_page_count: bool,

    /// Per-page price used for the dry-run estimate.
    pub cost_model: CostModel,

    /// Pre-constructed service. Takes precedence over `api_url`.
    pub service: Option<Arc<dyn ConversionService>>,

    /// Receives lifecycle events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            output_format: OutputFormat::default(),
            use_llm: false,
            paginate: false,
            keep_headers_footers: false,
            skip_policy: SkipPolicy::default(),
            max_pages_per_credential: 1000,
            poll_interval: Duration::from_secs(3),
            max_polls: 1000,
            poll_error_delay: Duration::from_secs(5),
            rate_limit: RetryPolicy::default(),
            request_timeout_secs: 300,
            local_page_count: true,
            cost_model: CostModel::default(),
            service: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("api_url", &self.api_url)
            .field("output_format", &self.output_format)
            .field("use_llm", &self.use_llm)
            .field("paginate", &self.paginate)
            .field("keep_headers_footers", &self.keep_headers_footers)
            .field("skip_policy", &self.skip_policy)
            .field("max_pages_per_credential", &self.max_pages_per_credential)
            .field("poll_interval", &self.poll_interval)
            .field("max_polls", &self.max_polls)
            .field("rate_limit", &self.rate_limit)
            .field("local_page_count", &self.local_page_count)
            .field("service", &self.service.as_ref().map(|_| "<dyn ConversionService>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The `additional_config` map sent with every submission, if any.
    pub fn additional_config(&self) -> Option<serde_json::Value> {
        if self.keep_headers_footers {
            Some(serde_json::json!({
                "keep_pageheader_in_output": true,
                "keep_pagefooter_in_output": true,
            }))
        } else {
            None
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConversionConfigBuilder")
            .field(&self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn use_llm(mut self, v: bool) -> Self {
        self.config.use_llm = v;
        self
    }

    pub fn paginate(mut self, v: bool) -> Self {
        self.config.paginate = v;
        self
    }

    pub fn keep_headers_footers(mut self, v: bool) -> Self {
        self.config.keep_headers_footers = v;
        self
    }

    pub fn skip_policy(mut self, policy: SkipPolicy) -> Self {
        self.config.skip_policy = policy;
        self
    }

    pub fn max_pages_per_credential(mut self, pages: usize) -> Self {
        self.config.max_pages_per_credential = pages;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn max_polls(mut self, n: u32) -> Self {
        self.config.max_polls = n;
        self
    }

    pub fn poll_error_delay(mut self, delay: Duration) -> Self {
        self.config.poll_error_delay = delay;
        self
    }

    pub fn rate_limit(mut self, policy: RetryPolicy) -> Self {
        self.config.rate_limit = policy;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn local_page_count(mut self, v: bool) -> Self {
        self.config.local_page_count = v;
        self
    }

    pub fn cost_model(mut self, model: CostModel) -> Self {
        self.config.cost_model = model;
        self
    }

    pub fn service(mut self, service: Arc<dyn ConversionService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2MdError> {
        let c = &self.config;
        if c.max_polls == 0 {
            return Err(Pdf2MdError::InvalidConfig("max_polls must be ≥ 1".into()));
        }
        if c.max_pages_per_credential < MIN_PAGES_PER_CREDENTIAL {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "max_pages_per_credential must be ≥ {}, got {}",
                MIN_PAGES_PER_CREDENTIAL, c.max_pages_per_credential
            )));
        }
        if c.rate_limit.max_attempts == 0 {
            return Err(Pdf2MdError::InvalidConfig(
                "rate-limit max_attempts must be ≥ 1".into(),
            ));
        }
        c.skip_policy.validate()?;
        if c.service.is_none()
            && !(c.api_url.starts_with("http://") || c.api_url.starts_with("https://"))
        {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "api_url must be an HTTP/HTTPS URL, got '{}'",
                c.api_url
            )));
        }
        Ok(self.config)
    }
}

// ── Policies and enums ───────────────────────────────────────────────────

/// Output format requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Html,
    Json,
}

impl OutputFormat {
    /// Value of the `output_format` form field, which is also the name of
    /// the result field carrying the converted body.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }
}

/// Fixed-ratio front/back matter heuristic.
///
/// Medical textbooks open with a title page, copyright, contents and preface
/// (about 1.4 % of pages) and close with an index and glossary (about 8.5 %).
/// Short documents have no meaningful margins and are rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkipPolicy {
    /// Fraction of pages skipped at the front.
    pub front_ratio: f64,
    /// Fraction of pages skipped at the back.
    pub back_ratio: f64,
    /// Documents shorter than this are rejected with `InvalidRange`.
    pub min_total_pages: usize,
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self {
            front_ratio: 0.014,
            back_ratio: 0.085,
            min_total_pages: 11,
        }
    }
}

impl SkipPolicy {
    fn validate(&self) -> Result<(), Pdf2MdError> {
        let in_unit = |r: f64| (0.0..1.0).contains(&r);
        if !in_unit(self.front_ratio) || !in_unit(self.back_ratio) {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "skip ratios must be in [0, 1), got front={} back={}",
                self.front_ratio, self.back_ratio
            )));
        }
        if self.front_ratio + self.back_ratio >= 1.0 {
            return Err(Pdf2MdError::InvalidConfig(
                "skip ratios leave no content pages".into(),
            ));
        }
        Ok(())
    }
}

/// Bounded exponential backoff for HTTP 429 responses.
///
/// Delay before retry `n` (1-based) is `base_delay * 2^(n-1)`, capped at
/// `max_delay`. A `Retry-After` header from the service wins when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total requests allowed, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the `retry`-th retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Per-page prices of the hosted service, in US dollars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub per_page: f64,
    pub per_page_with_llm: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            per_page: 0.004,
            per_page_with_llm: 0.006,
        }
    }
}

impl CostModel {
    pub fn estimate(&self, pages: usize, use_llm: bool) -> f64 {
        let rate = if use_llm {
            self.per_page_with_llm
        } else {
            self.per_page
        };
        pages as f64 * rate
    }
}
