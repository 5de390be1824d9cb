//! CLI binary for pdf2questions.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ExtractionConfig`, picks the run mode from the input path,
//! and prints a summary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2questions::{
    collect_json_files, collect_pdf_files, detect_input_kind, extract_files, extract_pdf,
    write_questions, Difficulty, ExtractionConfig, ExtractionOutput, ExtractionProgressCallback,
    HttpTimeouts, InputKind, PdfMode, ProgressCallback, QuestionDefaults,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

/// Renders one progress bar per document and a log line per chunk.
struct CliProgressCallback {
    bar: ProgressBar,
    chunk_started: Mutex<Option<Instant>>,
    chunk_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Loading input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            chunk_started: Mutex::new(None),
            chunk_errors: AtomicUsize::new(0),
        })
    }

    fn chunk_elapsed(&self) -> f64 {
        self.chunk_started
            .lock()
            .ok()
            .and_then(|mut g| g.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        let errors = self.chunk_errors.load(Ordering::SeqCst);
        if errors > 0 {
            eprintln!(
                "{} {} chunk(s) failed and contributed no questions",
                cyan("⚠"),
                red(&errors.to_string())
            );
        }
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_document_start(&self, document: &str, total_chunks: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total_chunks as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(document.to_string());
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{document}: {total_chunks} chunk(s)"))
        ));
    }

    fn on_chunk_start(&self, _document: &str, chunk: usize, _total: usize) {
        if let Ok(mut g) = self.chunk_started.lock() {
            *g = Some(Instant::now());
        }
        self.bar.set_message(format!("chunk {chunk}"));
    }

    fn on_chunk_complete(&self, _document: &str, chunk: usize, total: usize, count: usize) {
        let elapsed = self.chunk_elapsed();
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {:<14}  {}",
            green("✓"),
            chunk,
            total,
            dim(&format!("{count:>3} questions")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, _document: &str, chunk: usize, total: usize, error: &str) {
        let elapsed = self.chunk_elapsed();
        self.chunk_errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}  {}",
            red("✗"),
            chunk,
            total,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, document: &str, question_count: usize) {
        self.bar.println(format!(
            "{} {}: {} questions",
            green("✔"),
            document,
            bold(&question_count.to_string())
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a single PDF (runs magic-pdf first)
  pdf2questions -i paper.pdf -o ./output

  # Extract from a converter JSON dump
  pdf2questions -i paper_content_list.json -o ./output

  # Every PDF in a folder, one output per PDF
  pdf2questions -i ./pdfs -o ./output --batch

  # Every JSON dump in a folder, merged into merged_questions.json
  pdf2questions -i ./dumps -o ./output --batch

  # ... or one output per dump
  pdf2questions -i ./dumps -o ./output --batch --separate

  # Force OCR and keep the converter output
  pdf2questions -i scan.pdf -o ./output --mode ocr --temp-dir ./converted

ENVIRONMENT VARIABLES:
  A .env file in the working directory is loaded first.

  SILICONFLOW_API_KEY      API key (required)
  SILICONFLOW_API_BASE     OpenAI-compatible base URL
  SILICONFLOW_MODEL_NAME   Model name
  CHUNK_DELAY              Seconds between chunk calls (default 8)
  RETRY_DELAY              Base retry delay in seconds (default 5)
  NETWORK_ERROR_DELAY      Extra wait after a network failure (default 15)
  HTTP_READ_TIMEOUT        Read timeout in seconds (default 180)
  DEFAULT_SUBJECT          subject written into every question

  Run with --help for the full list; every tuning flag names its variable.
"#;

/// Extract structured exam questions from PDFs or converter JSON dumps.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2questions",
    version,
    about = "Extract structured exam questions from PDFs or converter JSON dumps",
    long_about = "Extract structured exam questions from PDF files (via the magic-pdf \
converter) or from its JSON text dumps, using an OpenAI-compatible completion API. \
Output is a JSON array of single- and multiple-choice questions.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input PDF/JSON file, or a folder of them with --batch.
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory.
    #[arg(short, long)]
    output: PathBuf,

    /// Process every file in the input folder.
    #[arg(long)]
    batch: bool,

    /// With --batch on a JSON folder: one output per file instead of merging.
    #[arg(long)]
    separate: bool,

    /// PDF conversion mode.
    #[arg(long, value_enum, default_value = "auto")]
    mode: ModeArg,

    /// Keep converter JSON output in this directory instead of a temp dir.
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// PDF→JSON converter program.
    #[arg(long, env = "PDF_CONVERTER", default_value = "magic-pdf")]
    converter: String,

    /// API key for the completion endpoint.
    #[arg(long, env = "SILICONFLOW_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenAI-compatible API base URL.
    #[arg(long, env = "SILICONFLOW_API_BASE")]
    api_base: Option<String>,

    /// Model name.
    #[arg(long, env = "SILICONFLOW_MODEL_NAME")]
    model: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "SYSTEM_PROMPT_FILE")]
    system_prompt: Option<PathBuf>,

    /// Max completion tokens per call.
    #[arg(long, env = "MAX_TOKENS", default_value_t = 8192)]
    max_tokens: u32,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Nucleus sampling (0.0–1.0).
    #[arg(long, env = "TOP_P", default_value_t = 0.9)]
    top_p: f32,

    /// Max prompt text characters per call; the rest is dropped.
    #[arg(long, env = "MAX_TEXT_LENGTH", default_value_t = 20_000)]
    max_text_length: usize,

    /// Attempts per call.
    #[arg(long, env = "MAX_RETRIES", default_value_t = 7)]
    max_retries: u32,

    /// Base retry delay, seconds.
    #[arg(long, env = "RETRY_DELAY", default_value_t = 5.0)]
    retry_delay: f64,

    /// Delay between chunk calls, seconds.
    #[arg(long, env = "CHUNK_DELAY", default_value_t = 8.0)]
    chunk_delay: f64,

    /// Extra wait after a chunk fails on the network, seconds.
    #[arg(long, env = "NETWORK_ERROR_DELAY", default_value_t = 15.0)]
    network_error_delay: f64,

    /// Wait before the first request of every call, seconds.
    #[arg(long, env = "API_WARMUP_DELAY", default_value_t = 2.0)]
    warmup_delay: f64,

    /// Connect timeout, seconds.
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value_t = 60.0)]
    connect_timeout: f64,

    /// Read timeout, seconds.
    #[arg(long, env = "HTTP_READ_TIMEOUT", default_value_t = 180.0)]
    read_timeout: f64,

    /// Write timeout, seconds.
    #[arg(long, env = "HTTP_WRITE_TIMEOUT", default_value_t = 60.0)]
    write_timeout: f64,

    /// Idle-connection pool timeout, seconds.
    #[arg(long, env = "HTTP_POOL_TIMEOUT", default_value_t = 300.0)]
    pool_timeout: f64,

    /// Concurrent requests per client.
    #[arg(long, env = "HTTP_MAX_CONNECTIONS", default_value_t = 1)]
    max_connections: usize,

    /// Idle keep-alive connections per host.
    #[arg(long, env = "HTTP_MAX_KEEPALIVE", default_value_t = 0)]
    max_keepalive: usize,

    /// Text records per chunk.
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 50)]
    chunk_size: usize,

    /// Default question title.
    #[arg(long, env = "DEFAULT_TITLE")]
    default_title: Option<String>,

    /// Default question subject.
    #[arg(long, env = "DEFAULT_SUBJECT")]
    default_subject: Option<String>,

    /// Default question module.
    #[arg(long, env = "DEFAULT_MODULE")]
    default_module: Option<String>,

    /// Default difficulty (easy, medium, hard, or 简单/中等/困难).
    #[arg(long, env = "DEFAULT_DIFFICULTY")]
    default_difficulty: Option<String>,

    /// Disable progress bar.
    #[arg(long, env = "PDF2QUESTIONS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Auto,
    Txt,
    Ocr,
}

impl From<ModeArg> for PdfMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Auto => PdfMode::Auto,
            ModeArg::Txt => PdfMode::Txt,
            ModeArg::Ocr => PdfMode::Ocr,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the per-chunk feedback; library INFO logs
    // would only interleave with it.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn ExtractionProgressCallback>),
    )
    .await?;

    let kind = detect_input_kind(&cli.input)
        .with_context(|| format!("Cannot use input {}", cli.input.display()))?;
    if cli.batch != kind.is_folder() {
        if cli.batch {
            bail!("--batch needs a folder, got {}", cli.input.display());
        }
        bail!(
            "{} is a folder; pass --batch to process every file in it",
            cli.input.display()
        );
    }

    tokio::fs::create_dir_all(&cli.output)
        .await
        .with_context(|| format!("Cannot create output directory {}", cli.output.display()))?;

    let started = Instant::now();
    let written = run(&cli, kind, &config).await;
    if let Some(cb) = &progress {
        cb.finish();
    }
    let written = written?;

    if !cli.quiet {
        let total: usize = written.iter().map(|(_, o)| o.questions.len()).sum();
        eprintln!(
            "{}  {} questions in {} file(s)  {:.1}s",
            green("✔"),
            bold(&total.to_string()),
            written.len(),
            started.elapsed().as_secs_f64()
        );
        for (path, output) in &written {
            print_summary(path, output);
        }
    }
    Ok(())
}

/// Execute the mode selected by the input kind; returns each written file.
async fn run(
    cli: &Cli,
    kind: InputKind,
    config: &ExtractionConfig,
) -> Result<Vec<(PathBuf, ExtractionOutput)>> {
    let mut written = Vec::new();
    match kind {
        InputKind::PdfFile => {
            let output = extract_pdf(&cli.input, cli.temp_dir.as_deref(), config)
                .await
                .context("Extraction failed")?;
            let path = output_file(&cli.output, &cli.input);
            write_questions(&output.questions, &path).await?;
            written.push((path, output));
        }
        InputKind::JsonFile => {
            let files = collect_json_files(&cli.input)?;
            let output = extract_files(&files, config)
                .await
                .context("Extraction failed")?;
            let path = output_file(&cli.output, &cli.input);
            write_questions(&output.questions, &path).await?;
            written.push((path, output));
        }
        InputKind::PdfFolder => {
            for pdf in collect_pdf_files(&cli.input)? {
                let output = match extract_pdf(&pdf, cli.temp_dir.as_deref(), config).await {
                    Ok(o) => o,
                    // Converter failures skip the PDF; the rest of the folder still runs.
                    Err(e) => {
                        eprintln!("{} {}: {}", red("✘"), pdf.display(), e);
                        continue;
                    }
                };
                let path = output_file(&cli.output, &pdf);
                write_questions(&output.questions, &path).await?;
                written.push((path, output));
            }
        }
        InputKind::JsonFolder if cli.separate => {
            for file in collect_json_files(&cli.input)? {
                let output = extract_files(std::slice::from_ref(&file), config)
                    .await
                    .context("Extraction failed")?;
                let path = output_file(&cli.output, &file);
                write_questions(&output.questions, &path).await?;
                written.push((path, output));
            }
        }
        InputKind::JsonFolder => {
            let files = collect_json_files(&cli.input)?;
            let output = extract_files(&files, config)
                .await
                .context("Extraction failed")?;
            let path = cli.output.join("merged_questions.json");
            write_questions(&output.questions, &path).await?;
            written.push((path, output));
        }
    }
    Ok(written)
}

/// `<output_dir>/<stem>_questions.json`.
fn output_file(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    output_dir.join(format!("{stem}_questions.json"))
}

fn print_summary(path: &Path, output: &ExtractionOutput) {
    let s = &output.stats;
    eprintln!("   {}", bold(&path.display().to_string()));
    eprintln!(
        "   {} documents ({} failed), {} chunks ({} failed, {} empty)",
        s.documents, s.documents_failed, s.chunks_total, s.chunks_failed, s.chunks_empty
    );
    eprintln!(
        "   {}",
        dim(&format!(
            "{} returned / {} rejected / {} non-choice removed / {} explanations filled",
            s.questions_raw, s.questions_rejected, s.questions_removed, s.explanations_backfilled
        ))
    );
    for doc in output.documents.iter().filter(|d| d.failed()) {
        eprintln!(
            "   {} {}: {}",
            red("✘"),
            doc.name,
            doc.error.as_deref().unwrap_or("failed")
        );
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let ms = |secs: f64| (secs.max(0.0) * 1000.0).round() as u64;

    let mut defaults = QuestionDefaults::default();
    if let Some(ref t) = cli.default_title {
        defaults.title = t.clone();
    }
    if let Some(ref s) = cli.default_subject {
        defaults.subject = s.clone();
    }
    if let Some(ref m) = cli.default_module {
        defaults.module = m.clone();
    }
    if let Some(ref d) = cli.default_difficulty {
        defaults.difficulty = Difficulty::from_label(d);
    }

    let mut builder = ExtractionConfig::builder()
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .top_p(cli.top_p)
        .max_text_length(cli.max_text_length)
        .max_retries(cli.max_retries)
        .retry_delay_ms(ms(cli.retry_delay))
        .chunk_delay_ms(ms(cli.chunk_delay))
        .network_error_delay_ms(ms(cli.network_error_delay))
        .warmup_delay_ms(ms(cli.warmup_delay))
        .timeouts(HttpTimeouts {
            connect_secs: cli.connect_timeout,
            read_secs: cli.read_timeout,
            write_secs: cli.write_timeout,
            pool_secs: cli.pool_timeout,
        })
        .max_connections(cli.max_connections)
        .max_keepalive(cli.max_keepalive)
        .chunk_size(cli.chunk_size)
        .defaults(defaults)
        .converter_program(cli.converter.clone())
        .pdf_mode(cli.mode.into());

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(ref base) = cli.api_base {
        builder = builder.api_base(base.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
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

    let config = builder.build().context("Invalid configuration")?;
    if config.api_key().is_none() {
        bail!("No API key: pass --api-key or set SILICONFLOW_API_KEY (a .env file works too)");
    }
    Ok(config)
}
