//! CLI binary for medbook-pdf2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, converts each input in turn with one shared credential
//! pool, and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use medbook_pdf2md::{
    convert_to_file, default_output_path, plan, ContentPlan, ConversionConfig,
    ConversionProgressCallback, CredentialPool, JobTicket, OutputFormat, ProgressCallback,
    RetryPolicy, SkipPolicy,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that follows one document through submission and polling.
/// Jobs never overlap, so a single bar is enough.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_document_start(&self, plan: &ContentPlan) {
        self.bar.set_prefix(plan.source_name.clone());
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&plan.source_name),
            dim(&format!(
                "{} pages, parsing {} in {} job(s), est. ${:.2}",
                plan.total_pages,
                plan.content_range,
                plan.jobs.len(),
                plan.estimated_cost_usd
            )),
        ));
    }

    fn on_job_submitted(&self, job: &JobTicket, credential: &str) {
        self.bar
            .set_message(format!("{} submitted with key {}", job.id, credential));
    }

    fn on_credential_rotated(&self, from: usize, to: usize, reason: &str) {
        self.bar.println(format!(
            "  {} key #{} → #{}  {}",
            cyan("↻"),
            from + 1,
            to + 1,
            dim(reason)
        ));
    }

    fn on_job_polling(&self, job: &JobTicket, polls: u32, elapsed: Duration) {
        self.bar.set_message(format!(
            "{} processing (check {}, {}s)",
            job.id,
            polls,
            elapsed.as_secs()
        ));
    }

    fn on_job_complete(&self, job: &JobTicket, elapsed: Duration, markdown_len: usize) {
        let pages = job.range.map(|r| r.to_string()).unwrap_or_else(|| "probe".into());
        self.bar.println(format!(
            "  {} {:<24} {:<12} {}  {}",
            green("✓"),
            job.id,
            pages,
            dim(&format!("{markdown_len:>8} chars")),
            dim(&format!("{:.1}s", elapsed.as_secs_f64())),
        ));
    }

    fn on_job_failed(&self, job: &JobTicket, elapsed: Duration, error: &str) {
        let first_line = error.lines().next().unwrap_or(error);
        self.bar.println(format!(
            "  {} {:<24} {}  {}",
            red("✗"),
            job.id,
            red(first_line),
            dim(&format!("{:.1}s", elapsed.as_secs_f64())),
        ));
    }

    fn on_document_complete(&self, _plan: &ContentPlan, output: Option<&Path>) {
        if let Some(path) = output {
            self.bar
                .println(format!("  {} {}", green("→"), bold(&path.display().to_string())));
        }
        self.bar.set_prefix("Preparing");
        self.bar.set_message("");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one textbook into ./parsed/
  medbook2md cardiology.pdf

  # Convert a whole shelf, spreading long books over three keys
  MARKER_API_KEYS=key1,key2,key3 medbook2md textbooks/ --output-dir parsed

  # Explicit output file
  medbook2md cardiology.pdf -o notes/cardiology.md

  # See what would be submitted, and what it would cost
  medbook2md --dry-run textbooks/

  # Higher-quality layout pass (about 50% more per page)
  medbook2md --use-llm cardiology.pdf

PAGE SELECTION:
  The first ~1.4% and last ~8.5% of pages (front matter, index, glossary)
  are skipped. Documents of 10 pages or fewer are rejected.

ENVIRONMENT VARIABLES:
  MARKER_API_KEYS     Comma-separated API keys, used in order
  MARKER_API_URL      Submit endpoint override
  PDFIUM_LIB_PATH     Path to libpdfium for free local page counting
  RUST_LOG            Overrides --verbose / --quiet log filtering
"#;

/// Convert medical textbook PDFs to Markdown via the Marker API.
#[derive(Parser, Debug)]
#[command(
    name = "medbook2md",
    version,
    about = "Convert medical textbook PDFs to Markdown via the Marker API",
    long_about = "Convert long medical textbook PDFs to Markdown through the hosted Marker \
conversion service. Front and back matter are skipped, long books are split across API \
keys, exhausted keys are rotated out automatically, and output is written atomically.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files, or directories containing PDF files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file (only valid with a single input PDF).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for `<stem>_content.md` outputs.
    #[arg(long, env = "MEDBOOK2MD_OUTPUT_DIR", default_value = "parsed")]
    output_dir: PathBuf,

    /// API key; repeat for several keys.
    #[arg(long = "api-key", value_name = "KEY")]
    api_keys: Vec<String>,

    /// Comma-separated API keys (used when no --api-key is given).
    #[arg(long, env = "MARKER_API_KEYS", hide_env_values = true)]
    api_key_list: Option<String>,

    /// Submit endpoint.
    #[arg(long, env = "MARKER_API_URL")]
    api_url: Option<String>,

    /// Format requested from the service.
    #[arg(long, value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Enable the service's LLM-assisted layout pass.
    #[arg(long, env = "MEDBOOK2MD_USE_LLM")]
    use_llm: bool,

    /// Ask the service to insert page delimiters.
    #[arg(long)]
    paginate: bool,

    /// Keep running page headers and footers.
    #[arg(long)]
    keep_headers_footers: bool,

    /// Page budget per API key before a book is split across two keys.
    #[arg(long, env = "MEDBOOK2MD_MAX_PAGES_PER_KEY", default_value_t = 1000)]
    max_pages_per_key: usize,

    /// Seconds between status checks.
    #[arg(long, env = "MEDBOOK2MD_POLL_INTERVAL", default_value_t = 3)]
    poll_interval: u64,

    /// Status checks per job before giving up.
    #[arg(long, env = "MEDBOOK2MD_MAX_POLLS", default_value_t = 1000)]
    max_polls: u32,

    /// Extra seconds to wait after a failed status check.
    #[arg(long, env = "MEDBOOK2MD_POLL_ERROR_DELAY", default_value_t = 5)]
    poll_error_delay: u64,

    /// Requests per call before giving up on HTTP 429.
    #[arg(long, env = "MEDBOOK2MD_RATE_LIMIT_ATTEMPTS", default_value_t = 20)]
    rate_limit_attempts: u32,

    /// First 429 backoff in seconds; doubles on each retry.
    #[arg(long, env = "MEDBOOK2MD_RATE_LIMIT_BASE_DELAY", default_value_t = 4)]
    rate_limit_base_delay: u64,

    /// Upper bound on a single 429 backoff, in seconds.
    #[arg(long, env = "MEDBOOK2MD_RATE_LIMIT_MAX_DELAY", default_value_t = 120)]
    rate_limit_max_delay: u64,

    /// Fraction of pages skipped at the front (table of contents, preface).
    #[arg(long, env = "MEDBOOK2MD_SKIP_FRONT", default_value_t = 0.014)]
    skip_front: f64,

    /// Fraction of pages skipped at the back (index, appendices).
    #[arg(long, env = "MEDBOOK2MD_SKIP_BACK", default_value_t = 0.085)]
    skip_back: f64,

    /// Documents with fewer pages are rejected.
    #[arg(long, env = "MEDBOOK2MD_MIN_PAGES", default_value_t = 11)]
    min_pages: usize,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "MEDBOOK2MD_REQUEST_TIMEOUT", default_value_t = 300)]
    request_timeout: u64,

    /// Skip local pdfium page counting and always use a probe job.
    #[arg(long)]
    no_local_page_count: bool,

    /// Print the conversion plan and estimated cost; convert nothing.
    #[arg(long)]
    dry_run: bool,

    /// Print per-document results as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "MEDBOOK2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MEDBOOK2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MEDBOOK2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Html,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Html => OutputFormat::Html,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; verbose mode wants everything.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.verbose;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let inputs = collect_inputs(&cli.inputs)?;
    if cli.output.is_some() && inputs.len() != 1 {
        anyhow::bail!("--output needs exactly one input PDF (got {})", inputs.len());
    }

    let pool = build_pool(&cli)?;

    let progress = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn ConversionProgressCallback>),
    )?;

    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {} document(s), {} API key(s)",
            cyan("◆"),
            inputs.len(),
            pool.len()
        );
    }

    // ── Run documents in order ───────────────────────────────────────────
    let mut failed = 0usize;
    let mut total_cost = 0.0f64;

    for input in &inputs {
        if cli.dry_run {
            match plan(input, &pool, &config).await {
                Ok(plan) => {
                    total_cost += plan.estimated_cost_usd;
                    report_plan(&cli, &plan)?;
                }
                Err(e) => {
                    failed += 1;
                    report_failure(&cli, input, &e)?;
                }
            }
            continue;
        }

        let output_path = cli
            .output
            .clone()
            .unwrap_or_else(|| default_output_path(input, &cli.output_dir));

        match convert_to_file(input, &output_path, &pool, &config).await {
            Ok(stats) => {
                total_cost += stats.estimated_cost_usd;
                if cli.json {
                    let line = serde_json::json!({
                        "input": input,
                        "output": output_path,
                        "stats": stats,
                    });
                    println!("{line}");
                } else if !cli.quiet {
                    eprintln!(
                        "{}  {}  {} pages  {} job(s)  {} images  {}ms  →  {}",
                        green("✔"),
                        input.display(),
                        stats.content_pages,
                        stats.jobs,
                        stats.images,
                        stats.total_duration_ms,
                        bold(&output_path.display().to_string()),
                    );
                }
            }
            Err(e) => {
                failed += 1;
                report_failure(&cli, input, &e)?;
            }
        }
    }

    if let Some(ref cb) = progress {
        cb.finish();
    }

    if !cli.quiet && !cli.json {
        let done = inputs.len() - failed;
        eprintln!(
            "{} {}/{} document(s) {}  {}",
            if failed == 0 { green("✔") } else { red("✘") },
            done,
            inputs.len(),
            if cli.dry_run { "planned" } else { "converted" },
            dim(&format!("est. ${total_cost:.2}")),
        );
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Expand directories into the PDFs they contain, sorted by name.
fn collect_inputs(args: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for arg in args {
        if arg.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(arg)
                .with_context(|| format!("Failed to list {}", arg.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .map(|e| e.eq_ignore_ascii_case("pdf"))
                            .unwrap_or(false)
                })
                .collect();
            found.sort();
            if found.is_empty() {
                tracing::warn!("No PDF files in {}", arg.display());
            }
            inputs.extend(found);
        } else {
            inputs.push(arg.clone());
        }
    }
    if inputs.is_empty() {
        anyhow::bail!("No input PDFs found");
    }
    Ok(inputs)
}

fn build_pool(cli: &Cli) -> Result<CredentialPool> {
    let pool = if !cli.api_keys.is_empty() {
        CredentialPool::new(&cli.api_keys)
    } else if let Some(ref list) = cli.api_key_list {
        CredentialPool::from_list(list)
    } else {
        anyhow::bail!("No API keys: pass --api-key or set MARKER_API_KEYS");
    };
    pool.context("Invalid API key list")
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .output_format(cli.format.into())
        .use_llm(cli.use_llm)
        .paginate(cli.paginate)
        .keep_headers_footers(cli.keep_headers_footers)
        .max_pages_per_credential(cli.max_pages_per_key)
        .poll_interval(Duration::from_secs(cli.poll_interval))
        .max_polls(cli.max_polls)
        .poll_error_delay(Duration::from_secs(cli.poll_error_delay))
        .rate_limit(RetryPolicy {
            max_attempts: cli.rate_limit_attempts,
            base_delay: Duration::from_secs(cli.rate_limit_base_delay),
            max_delay: Duration::from_secs(cli.rate_limit_max_delay),
        })
        .skip_policy(SkipPolicy {
            front_ratio: cli.skip_front,
            back_ratio: cli.skip_back,
            min_total_pages: cli.min_pages,
        })
        .request_timeout_secs(cli.request_timeout)
        .local_page_count(!cli.no_local_page_count);

    if let Some(ref url) = cli.api_url {
        builder = builder.api_url(url.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn report_plan(cli: &Cli, plan: &ContentPlan) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string(plan).context("Failed to serialise plan")?
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }
    let jobs: Vec<String> = plan.jobs.iter().map(|r| r.to_string()).collect();
    eprintln!(
        "{}  {}  {} pages  content {} ({} pages)  jobs [{}]  est. ${:.2}",
        cyan("◇"),
        plan.source_name,
        plan.total_pages,
        plan.content_range,
        plan.content_pages(),
        jobs.join(", "),
        plan.estimated_cost_usd,
    );
    Ok(())
}

fn report_failure(cli: &Cli, input: &Path, error: &medbook_pdf2md::Pdf2MdError) -> Result<()> {
    if cli.json {
        let line = serde_json::json!({
            "input": input,
            "error": error.to_string(),
            "retryable": error.is_retryable(),
        });
        println!("{line}");
    } else {
        eprintln!(
            "{}  {}  {}{}",
            red("✘"),
            input.display(),
            red(&error.to_string()),
            if error.is_retryable() {
                dim("  (transient; safe to retry later)")
            } else {
                String::new()
            },
        );
    }
    Ok(())
}
