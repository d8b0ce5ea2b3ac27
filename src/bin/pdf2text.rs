//! CLI binary for edgequake-pdf2text.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, wires Ctrl-C and the optional deadline to cancellation,
//! and prints the run report.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2text::pipeline::source::{BatchId, PageRange};
use edgequake_pdf2text::{
    extract_with_cancel, BatchFailure, CancelHandle, DocumentStatus, ExtractionProgressCallback,
    PipelineConfig, ProcessingMode, ProcessingSummary, ProgressCallback, RunReport, RunSettings,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status when at least one document is not fully extracted.
const EXIT_INCOMPLETE: i32 = 2;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per document, sized to the batches still pending for it.
/// Batches finish out of order, so lines are printed above the bar.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_document_start(&self, document: &Path, total_batches: usize, pending_batches: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos:>4}/{len} batches  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        self.bar.reset();
        self.bar.set_style(style);
        self.bar.set_length(pending_batches as u64);
        self.bar.set_prefix(
            document
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        self.errors.store(0, Ordering::SeqCst);
        if pending_batches < total_batches {
            self.bar.println(format!(
                "{} {}: resuming, {}/{} batches already done",
                dim("↻"),
                document.display(),
                total_batches - pending_batches,
                total_batches
            ));
        }
    }

    fn on_batch_start(&self, id: BatchId, pages: PageRange) {
        self.bar.set_message(format!("batch {id} pages {pages}"));
    }

    fn on_batch_complete(&self, id: BatchId, pages: PageRange, text_len: usize, attempts: u32) {
        let retries = if attempts > 1 {
            format!("  {}", yellow(&format!("{attempts} attempts")))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "  {} {:<5} pages {:<9} {}{}",
            green("✓"),
            id.to_string(),
            pages.to_string(),
            dim(&format!("{text_len:>6} chars")),
            retries
        ));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, id: BatchId, pages: PageRange, error: &BatchFailure) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = error.to_string();
        let msg = match msg.char_indices().nth(80) {
            Some((cut, _)) => format!("{}…", &msg[..cut]),
            None => msg,
        };
        self.bar.println(format!(
            "  {} {:<5} pages {:<9} {}",
            red("✗"),
            id.to_string(),
            pages.to_string(),
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, document: &Path, summary: &ProcessingSummary) {
        let mark = if summary.is_complete() {
            green("✔")
        } else {
            yellow("⚠")
        };
        let errors = self.errors.load(Ordering::SeqCst);
        let errors = if errors > 0 {
            format!("  {}", red(&format!("{errors} batch(es) failed this run")))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} {}  {}/{} pages ({:.2}%){}",
            mark,
            bold(&document.display().to_string()),
            summary.success_pages,
            summary.total_pages,
            summary.percent_complete,
            errors
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one document with the fast preset
  pdf2text document.pdf

  # A whole directory, gently, state under ./state
  pdf2text --mode slow --output-dir state scans/

  # Stop admitting new work after one hour; rerun later to resume
  pdf2text --deadline-secs 3600 scans/

  # Start over, discarding checkpoints
  pdf2text --reset scans/

  # Machine-readable run report
  pdf2text --json scans/ > report.json

OUTPUT (per document, under --output-dir):
  <file>/checkpoint.json   per-batch progress, used to resume
  <file>/summary.json      counts, failed batches, `complete` flag
  <file>/SUMMARY.txt       human-readable; last line STATUS: COMPLETE|INCOMPLETE
  <file>/text.txt          extracted text, one `=== PAGE n ===` section per page

EXIT STATUS:
  0  every document is completely extracted
  2  some document is incomplete, aborted or was not reached
  1  the run could not start (bad flags, no provider, unreadable input)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
"#;

/// Resumable PDF text extraction with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2text",
    version,
    about = "Resumable PDF text extraction with Vision LLMs",
    long_about = "Extract the text of PDF documents page by page with Vision Language Models. \
Progress is checkpointed per batch, so an interrupted or partially failed run can simply be \
started again and only the missing pages are sent.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// A PDF file or a directory of PDFs.
    input: PathBuf,

    /// Operating preset: fast (high concurrency) or slow (gentle, batched).
    #[arg(long, env = "PDF2TEXT_MODE", value_enum)]
    mode: Option<ModeArg>,

    /// JSON settings file (camelCase keys) applied on top of the preset.
    #[arg(long, env = "PDF2TEXT_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum extraction requests in flight.
    #[arg(short, long, env = "PDF2TEXT_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Pages per request.
    #[arg(short, long, env = "PDF2TEXT_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Total model calls per batch, first attempt included.
    #[arg(long, env = "PDF2TEXT_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Base backoff delay in milliseconds.
    #[arg(long, env = "PDF2TEXT_BASE_DELAY_MS")]
    base_delay_ms: Option<u64>,

    /// Pause between documents in milliseconds.
    #[arg(long, env = "PDF2TEXT_INTER_DOC_PAUSE_MS")]
    inter_doc_pause_ms: Option<u64>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "PDF2TEXT_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// Stop admitting new work after this many seconds.
    #[arg(long, env = "PDF2TEXT_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Directory for per-document state and output.
    #[arg(short, long, env = "PDF2TEXT_OUTPUT_DIR", default_value = "pdf2text-out")]
    output_dir: PathBuf,

    /// Discard existing checkpoints and summaries before processing.
    #[arg(long)]
    reset: bool,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2TEXT_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2TEXT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "PDF2TEXT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2TEXT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2TEXT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2TEXT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Fast,
    Slow,
}

impl From<ModeArg> for ProcessingMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Fast => ProcessingMode::Fast,
            ModeArg::Slow => ProcessingMode::Slow,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already reports every batch; keep library logs to
    // warnings while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let cli_progress = show_progress.then(CliProgressCallback::new);
    let progress_cb: Option<ProgressCallback> = cli_progress
        .clone()
        .map(|cb| cb as Arc<dyn ExtractionProgressCallback>);

    let config = build_config(&cli, progress_cb).await?;

    // ── Cancellation: Ctrl-C and optional deadline ───────────────────────
    let (handle, signal) = CancelHandle::new();
    let deadline = cli.deadline_secs.map(Duration::from_secs);
    tokio::spawn(async move {
        let timer = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted: finishing in-flight batches, then stopping (Ctrl-C again to abort)");
            }
            _ = timer => {
                info!("Deadline reached: finishing in-flight batches, then stopping");
            }
        }
        handle.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let report = extract_with_cancel(&cli.input, &config, signal, cli.reset)
        .await
        .context("Extraction failed")?;
    if let Some(cb) = cli_progress {
        cb.bar.finish_and_clear();
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_report(&report);
    }

    if !report.all_complete() {
        std::process::exit(EXIT_INCOMPLETE);
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
///
/// Precedence, lowest first: preset, settings file, individual flags.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let settings = match cli.config {
        Some(ref path) => Some(
            RunSettings::load(path)
                .await
                .with_context(|| format!("Failed to load settings from {:?}", path))?,
        ),
        None => None,
    };

    let mode = cli
        .mode
        .map(ProcessingMode::from)
        .or_else(|| settings.as_ref().and_then(|s| s.mode))
        .unwrap_or_default();

    let mut builder = PipelineConfig::builder_for(mode).output_dir(&cli.output_dir);
    if let Some(ref s) = settings {
        builder = builder.settings(s);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(n) = cli.batch_size {
        builder = builder.batch_size(n);
    }
    if let Some(n) = cli.max_retries {
        builder = builder.max_retries(n);
    }
    if let Some(ms) = cli.base_delay_ms {
        builder = builder.base_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.inter_doc_pause_ms {
        builder = builder.inter_doc_pause(Duration::from_millis(ms));
    }
    if let Some(secs) = cli.api_timeout {
        builder = builder.api_timeout(Duration::from_secs(secs));
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_report(report: &RunReport) {
    for doc in &report.documents {
        let (mark, label) = match doc.status {
            DocumentStatus::Complete => (green("✔"), "complete"),
            DocumentStatus::Skipped => (dim("="), "already complete"),
            DocumentStatus::Incomplete => (yellow("⚠"), "incomplete"),
            DocumentStatus::Aborted => (red("✘"), "aborted"),
            DocumentStatus::NotStarted => (dim("·"), "not started"),
        };
        let pages = doc
            .summary
            .as_ref()
            .map(|s| format!("  {}/{} pages", s.success_pages, s.total_pages))
            .unwrap_or_default();
        eprintln!("{} {}  {}{}", mark, doc.path.display(), label, pages);
        if let Some(ref e) = doc.error {
            eprintln!("    {}", red(e.lines().next().unwrap_or_default()));
        }
    }

    eprintln!(
        "{}  {} complete, {} skipped, {} incomplete, {} aborted  {}",
        if report.all_complete() { green("✔") } else { yellow("⚠") },
        report.count(DocumentStatus::Complete),
        report.count(DocumentStatus::Skipped),
        report.count(DocumentStatus::Incomplete),
        report.count(DocumentStatus::Aborted),
        dim(&format!("{} model calls, {}ms", report.model_calls(), report.elapsed_ms)),
    );
    if report.cancelled {
        eprintln!("   {}", yellow("run was cancelled; rerun to resume"));
    }
}
