//! CLI binary for edgequake-medreport.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `AnalysisConfig`, then analyzes local files, probes the
//! model endpoint, or runs the HTTP server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_medreport::config::{
    DEFAULT_MAX_FILE_MB, DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL, DEFAULT_PROBE_TIMEOUT_SECS,
};
use edgequake_medreport::{
    read_uploads, AnalysisConfig, AnalysisError, AnalysisOutput, AnalysisProgressCallback,
    Analyzer, Envelope, ModelBackend, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Model used with `--provider` when neither `--model` nor `EDGEQUAKE_MODEL` is set.
const DEFAULT_HOSTED_MODEL: &str = "gpt-4.1-nano";

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over the files, one log line per file, then a
/// spinner while the model is thinking. Files finish out of order when
/// extracted concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading files…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, name: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(name))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_analysis_start(&self, total_files: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos}/{len} files  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_files as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analyzing {total_files} file(s)…"))
        ));
    }

    fn on_file_start(&self, name: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(name.to_string(), Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_ocr_progress(&self, name: &str, percent: u8) {
        self.bar.set_message(format!("{name} (OCR {percent}%)"));
    }

    fn on_file_complete(&self, name: &str, chars: usize) {
        let secs = self.elapsed_secs(name);
        self.bar.println(format!(
            "  {} {:<40} {}  {}",
            green("✓"),
            name,
            dim(&format!("{chars:>6} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, name: &str, error: &str) {
        let secs = self.elapsed_secs(name);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<40} {}  {}",
            red("✗"),
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_model_start(&self, prompt_chars: usize) {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        self.bar.set_style(style);
        self.bar.set_prefix("Analyzing");
        self.bar
            .set_message(format!("waiting for the model ({prompt_chars} prompt chars)"));
    }

    fn on_analysis_complete(&self, processed_files: usize, total_files: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} file(s) analyzed",
                green("✔"),
                bold(&processed_files.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} file(s) analyzed  ({} unreadable)",
                yellow("⚠"),
                bold(&processed_files.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Summarize lab results with the local Ollama model
  medreport analyze bloodwork.pdf thyroid-panel.jpg

  # Machine-readable envelope
  medreport analyze --json scan.png > result.json

  # Use a hosted provider instead of Ollama
  medreport --provider openai --model gpt-4.1-mini analyze report.pdf

  # Check the model endpoint
  medreport health

  # Serve POST /api/analyze and GET /api/health on port 3000
  medreport serve --port 3000

LIMITS:
  At most 10 files per request, each at most --max-file-mb (default 15 MB).
  Supported: .pdf .png .jpg .jpeg .webp

ENVIRONMENT VARIABLES:
  OLLAMA_HOST             Ollama base URL (default http://localhost:11434)
  OLLAMA_MODEL            Ollama model (default llama3.1:8b)
  EDGEQUAKE_LLM_PROVIDER  Use a hosted provider (openai, anthropic, gemini, …)
  EDGEQUAKE_MODEL         Model for the hosted provider
  MAX_FILE_MB             Per-file size ceiling in MB
  PORT                    Port for `serve`
  MEDREPORT_DEV           Include technical details in error responses
  PDFIUM_DYNAMIC_LIB_PATH Directory containing the PDFium shared library
  RUST_LOG                Override log filter

REQUIREMENTS:
  PDFium shared library for PDFs, `tesseract` on PATH for images.
"#;

/// Summarize medical report PDFs and scans with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "medreport",
    version,
    about = "Summarize medical report PDFs and scans into structured insights using LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ollama base URL.
    #[arg(long, global = true, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_HOST)]
    ollama_host: String,

    /// Model ID. Ollama: OLLAMA_MODEL; hosted provider: EDGEQUAKE_MODEL.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Hosted provider (openai, anthropic, gemini, …). Ollama when unset.
    #[arg(long, global = true, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Per-file size ceiling in megabytes.
    #[arg(long, global = true, env = "MAX_FILE_MB", default_value_t = DEFAULT_MAX_FILE_MB)]
    max_file_mb: u64,

    /// Model call timeout in seconds.
    #[arg(long, global = true, env = "MEDREPORT_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Model sampling temperature (0.0–2.0).
    #[arg(long, global = true, env = "MEDREPORT_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max tokens the model may generate.
    #[arg(long, global = true, env = "MEDREPORT_MAX_TOKENS", default_value_t = 2000)]
    max_tokens: usize,

    /// Tesseract language profile.
    #[arg(long, global = true, env = "MEDREPORT_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Tesseract executable.
    #[arg(long, global = true, env = "MEDREPORT_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Directory for transient upload storage.
    #[arg(long, global = true, env = "MEDREPORT_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Files extracted concurrently.
    #[arg(long, global = true, env = "MEDREPORT_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Development mode: include technical details in error envelopes.
    #[arg(long, global = true, env = "MEDREPORT_DEV")]
    dev: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MEDREPORT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MEDREPORT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze up to 10 local report files.
    Analyze {
        /// PDF or image files.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the JSON envelope instead of a readable report.
        #[arg(long, env = "MEDREPORT_JSON")]
        json: bool,

        /// Disable the progress bar.
        #[arg(long, env = "MEDREPORT_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Probe the model endpoint.
    Health,

    /// Run the HTTP server.
    Serve {
        /// Port to listen on.
        #[arg(long, env = "PORT", default_value_t = 3000)]
        port: u16,

        /// Address to bind.
        #[arg(long, env = "MEDREPORT_BIND", default_value = "0.0.0.0")]
        bind: std::net::IpAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the interesting events, so library INFO logs
    // are hidden while it is shown.
    let show_progress = match &cli.command {
        Command::Analyze {
            json, no_progress, ..
        } => !cli.quiet && !json && !no_progress,
        _ => false,
    };
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

    match &cli.command {
        Command::Analyze { files, json, .. } => {
            let progress = show_progress.then(CliProgressCallback::new);
            let config = build_config(
                &cli,
                progress.clone().map(|cb| cb as ProgressCallback),
            )?;
            run_analyze(config, files, *json, cli.quiet, progress).await
        }
        Command::Health => run_health(build_config(&cli, None)?).await,
        Command::Serve { port, bind } => {
            let config = build_config(&cli, None)?;
            let analyzer = Arc::new(Analyzer::new(config).context("Failed to set up analyzer")?);
            let addr = SocketAddr::new(*bind, *port);
            if !cli.quiet {
                eprintln!(
                    "{} Serving on {}  {}",
                    cyan("◆"),
                    bold(&format!("http://{addr}")),
                    dim(&format!(
                        "model {} at {}",
                        analyzer.model().model(),
                        analyzer.model().endpoint()
                    ))
                );
            }
            edgequake_medreport::server::serve(analyzer, addr)
                .await
                .context("Server failed")
        }
    }
}

async fn run_analyze(
    config: AnalysisConfig,
    files: &[PathBuf],
    json: bool,
    quiet: bool,
    progress: Option<Arc<CliProgressCallback>>,
) -> Result<()> {
    let expose = config.expose_error_details;
    let outcome = analyze_files(config, files).await;

    if let Some(ref cb) = progress {
        cb.finish();
    }

    match outcome {
        Ok(output) => {
            if json {
                let json = serde_json::to_string_pretty(&Envelope::success(output))
                    .context("Failed to serialise output")?;
                println!("{json}");
            } else {
                print_report(&output);
                if !quiet {
                    eprintln!(
                        "{}",
                        dim(&format!(
                            "{}/{} files, {}ms extraction, {}ms model, {}ms total",
                            output.stats.files_processed,
                            output.stats.files_received,
                            output.stats.extraction_duration_ms,
                            output.stats.model_duration_ms,
                            output.stats.total_duration_ms
                        ))
                    );
                }
            }
            Ok(())
        }
        Err(e) if json => {
            let env = Envelope::failure(&e, expose);
            println!(
                "{}",
                serde_json::to_string_pretty(&env).context("Failed to serialise output")?
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::Error::new(e).context("Analysis failed")),
    }
}

async fn analyze_files(
    config: AnalysisConfig,
    files: &[PathBuf],
) -> std::result::Result<AnalysisOutput, AnalysisError> {
    let uploads = read_uploads(files, &config).await?;
    Analyzer::new(config)?.analyze(uploads).await
}

async fn run_health(config: AnalysisConfig) -> Result<()> {
    let analyzer = Analyzer::new(config).context("Failed to set up analyzer")?;
    let health = analyzer
        .health()
        .await
        .context("Model endpoint is not reachable")?;
    println!(
        "{} {}  model {}",
        green("✔"),
        bold(&health.endpoint),
        health.model
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&health.details).context("Failed to serialise details")?
    );
    Ok(())
}

fn print_report(output: &AnalysisOutput) {
    let r = &output.result;
    println!("{}\n{}\n", bold("Summary"), r.summary);

    let sections = [
        ("Key findings", &r.key_findings),
        ("Possible red flags", &r.possible_red_flags),
        ("Recommended follow-ups", &r.recommended_followups),
        ("Questions for your doctor", &r.questions_for_doctor),
    ];
    for (title, items) in sections {
        if items.is_empty() {
            continue;
        }
        println!("{}", bold(title));
        for item in items {
            println!("  • {item}");
        }
        println!();
    }

    if !output.failures.is_empty() {
        println!("{}", bold("Files not read"));
        for f in &output.failures {
            println!("  {} {}: {}", red("✗"), f.file, f.error);
        }
        println!();
    }

    if let Some(ref raw) = r.raw_response {
        if raw.chars().count() > r.summary.chars().count() {
            println!("{}\n{}\n", bold("Full model response"), raw);
        }
    }

    println!("{}", dim(&r.disclaimer));
}

/// Map CLI args and environment to `AnalysisConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let backend = match cli.provider.as_deref().filter(|p| !p.is_empty()) {
        Some(provider) => ModelBackend::Hosted {
            provider: provider.to_string(),
            model: cli
                .model
                .clone()
                .or_else(|| non_empty_env("EDGEQUAKE_MODEL"))
                .unwrap_or_else(|| DEFAULT_HOSTED_MODEL.to_string()),
        },
        None => ModelBackend::Ollama {
            host: cli.ollama_host.clone(),
            model: cli
                .model
                .clone()
                .or_else(|| non_empty_env("OLLAMA_MODEL"))
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
        },
    };

    let mut builder = AnalysisConfig::builder()
        .backend(backend)
        .max_file_mb(cli.max_file_mb)
        .model_timeout_secs(cli.timeout)
        .probe_timeout_secs(DEFAULT_PROBE_TIMEOUT_SECS.min(cli.timeout))
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .ocr_language(cli.ocr_lang.clone())
        .tesseract_path(cli.tesseract.clone())
        .expose_error_details(cli.dev);

    if let Some(dir) = &cli.scratch_dir {
        builder = builder.scratch_dir(dir.clone());
    }
    if let Some(n) = cli.concurrency {
        builder = builder.extraction_concurrency(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
