//! # edgequake-medreport
//!
//! Summarize a small batch of medical reports (PDFs or photos/scans) into a
//! fixed structured schema using a large language model.
//!
//! ## Why this crate?
//!
//! Lab results and imaging reports arrive as a mix of digital PDFs and phone
//! photos. This crate pulls plain text out of each file (the PDF text layer
//! via PDFium, or Tesseract OCR after a fixed image cleanup), asks a model
//! for a patient-friendly summary, and always hands back something usable:
//! either the model's JSON or a fallback that keeps the raw answer.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads (≤ 10 files, ≤ 15 MB each, pdf/png/jpg/jpeg/webp)
//!  │
//!  ├─ 1. Intake   validate in memory, stage to scratch behind a Drop guard
//!  ├─ 2. Extract  PDFium text layer | grayscale → normalize → sharpen → OCR
//!  ├─ 3. Prompt   "### FILE: name" blocks joined by "---"
//!  ├─ 4. Model    one call, 120 s bound, no retries (Ollama or hosted)
//!  ├─ 5. Coerce   widest {...} span, or fallback with raw_response
//!  └─ 6. Cleanup  staged files removed on every exit path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_medreport::{AnalysisConfig, Analyzer, Upload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Ollama at http://localhost:11434 with llama3.1:8b
//!     let analyzer = Analyzer::new(AnalysisConfig::default())?;
//!     let bytes = std::fs::read("bloodwork.pdf")?;
//!     let output = analyzer.analyze(vec![Upload::new("bloodwork.pdf", bytes)]).await?;
//!     println!("{}", output.result.summary);
//!     for finding in &output.result.key_findings {
//!         println!("- {finding}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `medreport` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | Enables [`server`], an axum router for `/api/health` and `/api/analyze` |
//!
//! Library-only use:
//! ```toml
//! edgequake-medreport = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime requirements
//!
//! - PDFium shared library (`PDFIUM_DYNAMIC_LIB_PATH`, next to the executable,
//!   or installed system-wide)
//! - `tesseract` on `PATH` (or set via config) for image files
//! - a reachable model endpoint

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze_paths, read_uploads, Analyzer, Stage};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, ModelBackend, MAX_FILES};
pub use error::{AnalysisError, ErrorKind, ExtractionError, ModelError};
pub use output::{AnalysisOutput, AnalysisResult, AnalysisStats, Envelope, FileFailure};
pub use pipeline::extract::{DocumentExtractor, TextExtractor};
pub use pipeline::intake::Upload;
pub use pipeline::llm::{EndpointHealth, ModelClient, OllamaClient, ProviderClient};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
