//! CLI binary for papertab.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use papertab::{
    extract_corpus, extract_pdf, extract_to_file, inspect, BatchCounts, BatchPass, Caption, DocumentJob,
    DocumentOutcome, ExtractionConfig, ExtractionProgressCallback, PdfSource, PdfiumSource, ProgressCallback,
    VisionDetail, DEFAULT_MODEL,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while batches run, then one line per finished table.
struct CliProgressCallback {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed_precise}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Planning regions…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, documents: usize, tables: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {tables} tables from {documents} documents…"))
        ));
        self.bar.set_prefix("Rendering");
        self.bar.set_message(format!("{tables} regions"));
    }

    fn on_batch_submitted(&self, pass: BatchPass, requests: usize) {
        self.bar.set_prefix(format!("Batch ({pass})"));
        self.bar.set_message(format!("{requests} requests submitted"));
    }

    fn on_batch_polled(&self, pass: BatchPass, counts: &BatchCounts) {
        self.bar.set_prefix(format!("Batch ({pass})"));
        self.bar.set_message(format!(
            "{} processing  {} succeeded  {} errored",
            counts.processing, counts.succeeded, counts.errored
        ));
    }

    fn on_table_complete(&self, detail: &VisionDetail) {
        let mark = if detail.parse_success { green("✓") } else { red("✗") };
        if !detail.parse_success {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        let note = match (&detail.error, detail.recropped) {
            (Some(e), _) => red(&truncate(&e.to_string(), 80)),
            (None, true) => dim("recropped"),
            (None, false) => String::new(),
        };
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            mark,
            detail.table_id,
            dim(&format!("{} img", detail.images)),
            note
        ));
    }

    fn on_extraction_complete(&self, tables: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = tables.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!("{} {} tables extracted", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} tables extracted  ({} failed)",
                if failed == tables { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                tables,
                red(&failed.to_string()),
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One paper, captions from the caption detector
  papertab paper.pdf --captions paper.captions.json -o paper.tables.json

  # A whole corpus in one batch job
  papertab --manifest corpus.json -o corpus.tables.json

  # Page count and sizes only (no API key needed)
  papertab --inspect-only paper.pdf

MANIFEST FORMAT:
  [
    {"pdf": "papers/smith2021.pdf", "captions": "captions/smith2021.json"},
    {"pdf": "papers/lee2019.pdf",   "captions": "captions/lee2019.json"}
  ]
  Relative paths are resolved against the manifest's directory.

CAPTIONS FORMAT:
  [{"type": "table", "number": "2", "text": "Table 2: ...",
    "bbox": {"x0": 72, "top": 100, "x1": 540, "bottom": 112}, "page": 4}]

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY       Anthropic API key (Message Batches API)
  ANTHROPIC_BASE_URL      Override the Anthropic API host
  EDGEQUAKE_LLM_PROVIDER  Synchronous fallback provider (openai, gemini, ollama, …)
  EDGEQUAKE_MODEL         Model for the fallback provider
  PDFIUM_LIB_PATH         Directory containing libpdfium
"#;

/// Extract tables from academic-paper PDFs with a vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "papertab",
    version,
    about = "Extract captioned tables from PDFs using a vision LLM batch API",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file to extract from.
    #[arg(required_unless_present = "manifest", conflicts_with = "manifest")]
    input: Option<PathBuf>,

    /// JSON array of captions for INPUT.
    #[arg(long, env = "PAPERTAB_CAPTIONS", required_unless_present_any = ["manifest", "inspect_only"])]
    captions: Option<PathBuf>,

    /// JSON array of {pdf, captions} entries processed as one corpus.
    #[arg(long, env = "PAPERTAB_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "PAPERTAB_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model ID.
    #[arg(long, env = "PAPERTAB_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Lowest render DPI.
    #[arg(long, env = "PAPERTAB_DPI_FLOOR", default_value_t = 100,
          value_parser = clap::value_parser!(u32).range(36..=600))]
    dpi_floor: u32,

    /// Highest render DPI.
    #[arg(long, env = "PAPERTAB_DPI_CAP", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(36..=600))]
    dpi_cap: u32,

    /// Split tall regions into strips when their DPI falls below this.
    #[arg(long, env = "PAPERTAB_STRIP_DPI_THRESHOLD", default_value_t = 150)]
    strip_dpi_threshold: u32,

    /// Fraction of each strip shared with the next.
    #[arg(long, env = "PAPERTAB_OVERLAP_FRAC", default_value_t = 0.15)]
    overlap_frac: f64,

    /// Max output tokens per table.
    #[arg(long, env = "PAPERTAB_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Sampling temperature (0.0–1.0).
    #[arg(long, env = "PAPERTAB_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// First batch poll delay in milliseconds (doubles up to 60 s).
    #[arg(long, env = "PAPERTAB_POLL_INTERVAL_MS", default_value_t = 5000)]
    poll_interval_ms: u64,

    /// Give up waiting on a batch after this many seconds.
    #[arg(long, env = "PAPERTAB_BATCH_TIMEOUT", default_value_t = 3600)]
    batch_timeout: u64,

    /// Concurrent calls when falling back to a synchronous provider.
    #[arg(short, long, env = "PAPERTAB_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per call for the synchronous provider.
    #[arg(long, env = "PAPERTAB_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAPERTAB_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom instruction block.
    #[arg(long, env = "PAPERTAB_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Disable progress spinner.
    #[arg(long, env = "PAPERTAB_NO_PROGRESS")]
    no_progress: bool,

    /// Print page count and sizes only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAPERTAB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAPERTAB_QUIET")]
    quiet: bool,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    pdf: PathBuf,
    captions: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let input = cli.input.as_deref().context("--inspect-only needs a PDF path")?;
        let sizes = inspect(input, &config).await.context("Failed to inspect PDF")?;
        println!("File:   {}", input.display());
        println!("Pages:  {}", sizes.len());
        for (i, size) in sizes.iter().enumerate() {
            println!("  {:>4}  {:.1} × {:.1} pt", i + 1, size.width, size.height);
        }
        return Ok(());
    }

    // ── Corpus mode ──────────────────────────────────────────────────────
    if let Some(ref manifest) = cli.manifest {
        let outcomes = run_manifest(manifest, &config).await?;
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, DocumentOutcome::Failed { .. }))
            .count();
        emit(&outcomes, cli.output.as_deref()).await?;
        if !cli.quiet {
            eprintln!(
                "{}  {}/{} documents",
                if failed == 0 { green("✔") } else { cyan("⚠") },
                outcomes.len() - failed,
                outcomes.len()
            );
        }
        return Ok(());
    }

    // ── Single document ──────────────────────────────────────────────────
    let input = cli.input.as_deref().context("missing PDF path")?;
    let captions_path = cli.captions.as_deref().context("--captions is required")?;
    let captions = read_captions(captions_path).await?;

    if let Some(ref output_path) = cli.output {
        let stats = extract_to_file(input, captions, output_path, &config)
            .await
            .context("Extraction failed")?;
        if !cli.quiet {
            eprintln!(
                "{}  {}/{} tables  {}ms  →  {}",
                if stats.parse_failures == 0 { green("✔") } else { cyan("⚠") },
                stats.tables - stats.parse_failures,
                stats.tables,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
            eprintln!(
                "   {} tokens in ({} cached)  /  {} tokens out",
                dim(&stats.input_tokens.to_string()),
                dim(&stats.cache_read_tokens.to_string()),
                dim(&stats.output_tokens.to_string()),
            );
        }
    } else {
        let doc = extract_pdf(input, captions, &config)
            .await
            .context("Extraction failed")?;
        emit(&doc, None).await?;
        if !cli.quiet && !show_progress {
            eprintln!(
                "Extracted {}/{} tables in {}ms",
                doc.stats.tables - doc.stats.parse_failures,
                doc.stats.tables,
                doc.stats.total_duration_ms
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .model(cli.model.clone())
        .dpi_floor(cli.dpi_floor)
        .dpi_cap(cli.dpi_cap)
        .strip_dpi_threshold(cli.strip_dpi_threshold)
        .overlap_frac(cli.overlap_frac)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .poll_interval_ms(cli.poll_interval_ms)
        .batch_timeout_secs(cli.batch_timeout)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref dir) = cli.pdfium_lib_path {
        builder = builder.pdfium_library_path(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_captions(path: &Path) -> Result<Vec<Caption>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read captions from {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Captions file {:?} is not a caption array", path))
}

/// Open every manifest entry and run them as one corpus. Entries whose PDF
/// cannot be opened are reported as failed in their manifest position.
async fn run_manifest(manifest: &Path, config: &ExtractionConfig) -> Result<Vec<DocumentOutcome>> {
    let raw = tokio::fs::read_to_string(manifest)
        .await
        .with_context(|| format!("Failed to read manifest {:?}", manifest))?;
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&raw).with_context(|| format!("Manifest {:?} is not a {{pdf, captions}} array", manifest))?;
    let base = manifest.parent().unwrap_or_else(|| Path::new("."));

    let mut jobs = Vec::new();
    let mut slots: Vec<Option<DocumentOutcome>> = Vec::with_capacity(entries.len());
    for entry in entries {
        let pdf = base.join(&entry.pdf);
        let captions = read_captions(&base.join(&entry.captions)).await?;
        match PdfiumSource::open(&pdf) {
            Ok(source) => {
                let source = source
                    .with_password(config.password.clone())
                    .with_library_path(config.pdfium_library_path.clone());
                jobs.push(DocumentJob::new(Arc::new(source) as Arc<dyn PdfSource>, captions));
                slots.push(None);
            }
            Err(e) => slots.push(Some(DocumentOutcome::Failed {
                document_ref: pdf.display().to_string(),
                error: e.to_string(),
            })),
        }
    }

    let mut extracted = extract_corpus(jobs, config)
        .await
        .context("Extraction failed")?
        .into_iter();
    Ok(slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| extracted.next()))
        .collect())
}

async fn emit<T: serde::Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    match output {
        Some(path) => tokio::fs::write(path, json + "\n")
            .await
            .with_context(|| format!("Failed to write {:?}", path)),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
