//! Configuration types for medical report analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`]. The config is resolved once at startup
//! (from CLI flags and environment variables in the binary) and passed
//! explicitly into the pipeline; nothing below reads the environment ad hoc.

use crate::error::AnalysisError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Hard cap on files per request.
pub const MAX_FILES: usize = 10;

/// Default per-file size ceiling in megabytes.
pub const DEFAULT_MAX_FILE_MB: u64 = 15;

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Default Ollama model.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:8b";

/// Default reachability-probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Which external text-generation service answers the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelBackend {
    /// A local or remote Ollama server (`/api/generate`, `/api/tags`).
    Ollama { host: String, model: String },
    /// A hosted provider resolved through `edgequake-llm`
    /// (e.g. `openai`, `anthropic`, `gemini`).
    Hosted { provider: String, model: String },
}

impl Default for ModelBackend {
    fn default() -> Self {
        ModelBackend::Ollama {
            host: DEFAULT_OLLAMA_HOST.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
        }
    }
}

impl ModelBackend {
    /// Model identifier sent with each request.
    pub fn model(&self) -> &str {
        match self {
            ModelBackend::Ollama { model, .. } | ModelBackend::Hosted { model, .. } => model,
        }
    }

    /// Human-readable endpoint identity, used in logs and errors.
    pub fn endpoint(&self) -> String {
        match self {
            ModelBackend::Ollama { host, .. } => host.trim_end_matches('/').to_string(),
            ModelBackend::Hosted { provider, .. } => provider.clone(),
        }
    }
}

/// Configuration for one analysis pipeline.
///
/// # Example
/// ```rust
/// use edgequake_medreport::{AnalysisConfig, ModelBackend};
///
/// let config = AnalysisConfig::builder()
///     .backend(ModelBackend::Ollama {
///         host: "http://localhost:11434".into(),
///         model: "llama3.1:8b".into(),
///     })
///     .max_file_mb(20)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_file_bytes, 20 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Per-file size ceiling in bytes. Default: 15 MB.
    pub max_file_bytes: u64,

    /// Model endpoint. Default: Ollama at `localhost:11434` with `llama3.1:8b`.
    pub backend: ModelBackend,

    /// Sampling temperature for the model. Default: 0.7.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 2000.
    pub max_tokens: usize,

    /// Bound on the analysis call in seconds. Default: 120.
    ///
    /// The model call is the only blocking point of a request, so this is
    /// also the upper bound on request latency once extraction is done.
    pub model_timeout_secs: u64,

    /// Bound on the reachability probe in seconds. Default: 5.
    pub probe_timeout_secs: u64,

    /// Tesseract language profile for image OCR. Default: `eng`.
    pub ocr_language: String,

    /// Tesseract executable. Default: `tesseract` (resolved on `PATH`).
    pub tesseract_path: PathBuf,

    /// Minimum characters for an extraction to count as readable. Default: 10.
    ///
    /// A heuristic guard against scanned PDFs with no text layer and blank
    /// images, not a correctness bound.
    pub min_text_chars: usize,

    /// Files extracted concurrently within one request. Default: CPUs, max 4.
    pub extraction_concurrency: usize,

    /// Root of transient upload storage. If None, a directory under the
    /// system temp dir is used.
    pub scratch_dir: Option<PathBuf>,

    /// Include technical error details in failure envelopes. Default: false.
    pub expose_error_details: bool,

    /// Receives per-file and per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_MB * 1024 * 1024,
            backend: ModelBackend::default(),
            temperature: 0.7,
            max_tokens: 2000,
            model_timeout_secs: 120,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            ocr_language: "eng".to_string(),
            tesseract_path: PathBuf::from("tesseract"),
            min_text_chars: 10,
            extraction_concurrency: default_concurrency(),
            scratch_dir: None,
            expose_error_details: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("max_file_bytes", &self.max_file_bytes)
            .field("backend", &self.backend)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("model_timeout_secs", &self.model_timeout_secs)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("ocr_language", &self.ocr_language)
            .field("tesseract_path", &self.tesseract_path)
            .field("min_text_chars", &self.min_text_chars)
            .field("extraction_concurrency", &self.extraction_concurrency)
            .field("scratch_dir", &self.scratch_dir)
            .field("expose_error_details", &self.expose_error_details)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn AnalysisProgressCallback>"),
            )
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }

    /// Size ceiling expressed in whole megabytes, for messages.
    pub fn max_file_mb(&self) -> u64 {
        self.max_file_bytes / (1024 * 1024)
    }

    /// Directory uploads are staged into for the duration of a request.
    pub fn resolved_scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("edgequake-medreport-uploads"))
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn max_file_mb(mut self, mb: u64) -> Self {
        self.config.max_file_bytes = mb.max(1).saturating_mul(1024 * 1024);
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn backend(mut self, backend: ModelBackend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn model_timeout_secs(mut self, secs: u64) -> Self {
        self.config.model_timeout_secs = secs;
        self
    }

    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.config.probe_timeout_secs = secs;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn extraction_concurrency(mut self, n: usize) -> Self {
        self.config.extraction_concurrency = n.max(1);
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn expose_error_details(mut self, v: bool) -> Self {
        self.config.expose_error_details = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, AnalysisError> {
        let c = &self.config;
        if c.max_file_bytes == 0 {
            return Err(AnalysisError::InvalidConfig(
                "Per-file size limit must be > 0".into(),
            ));
        }
        if c.model_timeout_secs == 0 || c.probe_timeout_secs == 0 {
            return Err(AnalysisError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.probe_timeout_secs > c.model_timeout_secs {
            return Err(AnalysisError::InvalidConfig(format!(
                "Probe timeout ({}s) must not exceed the analysis timeout ({}s)",
                c.probe_timeout_secs, c.model_timeout_secs
            )));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(AnalysisError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        if let ModelBackend::Ollama { host, .. } = &c.backend {
            if !(host.starts_with("http://") || host.starts_with("https://")) {
                return Err(AnalysisError::InvalidConfig(format!(
                    "Ollama host must be an http(s) URL, got '{host}'"
                )));
            }
        }
        if c.backend.model().trim().is_empty() {
            return Err(AnalysisError::InvalidConfig("Model name must not be empty".into()));
        }
        Ok(self.config)
    }
}
