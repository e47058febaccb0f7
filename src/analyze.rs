//! Batch analysis entry points.
//!
//! [`Analyzer`] sequences the pipeline stages for one request:
//!
//! ```text
//! Validating → Extracting → Building → Invoking → Coercing → Cleaning → Done
//! ```
//!
//! Any stage may end the request in `Failed` instead. Cleaning is not a
//! step that can be skipped: the staged files live in a [`StagedBatch`]
//! whose `Drop` removes them, so an early `?`, a panic or a dropped future
//! all leave the scratch directory as it was found.

use crate::config::{AnalysisConfig, MAX_FILES};
use crate::error::AnalysisError;
use crate::output::{AnalysisOutput, AnalysisStats, Envelope, FileFailure};
use crate::pipeline::coerce::coerce;
use crate::pipeline::extract::{DocumentExtractor, TextExtractor};
use crate::pipeline::intake::{validate_batch, StagedBatch, StagedFile, Upload};
use crate::pipeline::llm::{client_from_config, EndpointHealth, ModelClient};
use crate::prompts::{build_prompt, file_block, join_blocks};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of one analysis request, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Extracting,
    Building,
    Invoking,
    Coercing,
    Cleaning,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Validating => "validating",
            Stage::Extracting => "extracting",
            Stage::Building => "building",
            Stage::Invoking => "invoking",
            Stage::Coercing => "coercing",
            Stage::Cleaning => "cleaning",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of extracting one staged file, tagged with its upload position.
struct FileOutcome {
    index: usize,
    name: String,
    text: Result<String, crate::error::ExtractionError>,
}

/// Runs the analysis pipeline against one model client and one extractor.
///
/// Cheap to share behind an `Arc`; holds no per-request state.
pub struct Analyzer {
    config: AnalysisConfig,
    model: Arc<dyn ModelClient>,
    extractor: Arc<dyn TextExtractor>,
}

impl Analyzer {
    /// Build the production analyzer: the model client named by
    /// `config.backend` and the PDFium/Tesseract extractor.
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let model = client_from_config(&config)?;
        let extractor: Arc<dyn TextExtractor> = Arc::new(DocumentExtractor::from_config(&config));
        info!(
            "Analyzer ready: model '{}' at {}",
            model.model(),
            model.endpoint()
        );
        Ok(Self {
            config,
            model,
            extractor,
        })
    }

    /// Assemble an analyzer from explicit parts (custom backends, tests).
    pub fn with_parts(
        config: AnalysisConfig,
        model: Arc<dyn ModelClient>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            config,
            model,
            extractor,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<dyn ModelClient> {
        &self.model
    }

    /// Analyze one batch of uploads.
    ///
    /// # Returns
    /// `Ok(AnalysisOutput)` when at least one file produced text and the
    /// model answered, even if some files failed (see `output.failures`)
    /// or the answer had to be coerced through the fallback.
    ///
    /// # Errors
    /// - validation errors, before anything is written
    /// - [`AnalysisError::ExtractionTotalFailure`] when no file produced text
    /// - model unreachable / timeout / bad response
    /// - staging failures
    pub async fn analyze(&self, uploads: Vec<Upload>) -> Result<AnalysisOutput, AnalysisError> {
        let total_start = Instant::now();
        let files_received = uploads.len();
        info!("Received {} file(s) for analysis", files_received);

        debug!(stage = %Stage::Validating);
        validate_batch(&uploads, &self.config)?;

        let scratch = self.config.resolved_scratch_dir();
        let mut batch = StagedBatch::stage_async(uploads, scratch).await?;

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_analysis_start(batch.len());
        }

        let outcome = self.run_staged(&batch, total_start).await;

        debug!(stage = %Stage::Cleaning, files = batch.len());
        batch.cleanup_async().await;

        match &outcome {
            Ok(output) => {
                info!(
                    stage = %Stage::Done,
                    "Analysis complete: {}/{} files, {}ms total",
                    output.stats.files_processed,
                    files_received,
                    output.stats.total_duration_ms
                );
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_analysis_complete(output.stats.files_processed, files_received);
                }
            }
            Err(e) => warn!(stage = %Stage::Failed, "Analysis failed: {}", e),
        }
        outcome
    }

    /// Analyze, then wrap the outcome in the wire [`Envelope`].
    pub async fn analyze_envelope(&self, uploads: Vec<Upload>) -> Envelope {
        match self.analyze(uploads).await {
            Ok(output) => Envelope::success(output),
            Err(e) => {
                error!("Error during analysis: {}", e);
                Envelope::failure(&e, self.config.expose_error_details)
            }
        }
    }

    /// Probe the model endpoint with the short health timeout.
    pub async fn health(&self) -> Result<EndpointHealth, AnalysisError> {
        self.model
            .probe()
            .await
            .map_err(|e| AnalysisError::from_model(self.model.endpoint(), e))
    }

    // ── Stages after staging ─────────────────────────────────────────────

    async fn run_staged(
        &self,
        batch: &StagedBatch,
        total_start: Instant,
    ) -> Result<AnalysisOutput, AnalysisError> {
        // ── Extract ──────────────────────────────────────────────────────
        debug!(stage = %Stage::Extracting, files = batch.len());
        let extraction_start = Instant::now();
        let outcomes = self.extract_all(batch.files().to_vec()).await;
        let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;

        let mut blocks = Vec::new();
        let mut processed_files = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.text {
                Ok(text) => {
                    blocks.push(file_block(&outcome.name, &text));
                    processed_files.push(outcome.name);
                }
                Err(error) => failures.push(FileFailure {
                    file: outcome.name,
                    error,
                }),
            }
        }

        if processed_files.is_empty() {
            let first_error = failures
                .first()
                .map(|f| format!("{}: {}", f.file, f.error))
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(AnalysisError::ExtractionTotalFailure {
                total: batch.len(),
                first_error,
            });
        }

        // ── Build ────────────────────────────────────────────────────────
        debug!(stage = %Stage::Building, blocks = blocks.len());
        let joined = join_blocks(&blocks);
        let prompt = build_prompt(&joined);

        // ── Invoke ───────────────────────────────────────────────────────
        debug!(stage = %Stage::Invoking, prompt_chars = prompt.len());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_model_start(prompt.len());
        }
        let model_start = Instant::now();
        let raw = self
            .model
            .invoke(&prompt)
            .await
            .map_err(|e| AnalysisError::from_model(self.model.endpoint(), e))?;
        let model_duration_ms = model_start.elapsed().as_millis() as u64;
        info!(
            "Model '{}' answered in {}ms ({} chars)",
            self.model.model(),
            model_duration_ms,
            raw.len()
        );

        // ── Coerce ───────────────────────────────────────────────────────
        debug!(stage = %Stage::Coercing);
        let result = coerce(&raw);

        let stats = AnalysisStats {
            files_received: batch.len(),
            files_processed: processed_files.len(),
            files_failed: failures.len(),
            extracted_chars: joined.chars().count(),
            extraction_duration_ms,
            model_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        Ok(AnalysisOutput {
            result,
            processed_files,
            failures,
            stats,
        })
    }

    /// Extract every staged file with bounded concurrency, in upload order.
    ///
    /// Each per-file future owns its file and handles, so the returned
    /// future stays `Send` for callers such as axum handlers.
    async fn extract_all(&self, files: Vec<StagedFile>) -> Vec<FileOutcome> {
        let extractor = Arc::clone(&self.extractor);
        let cb = self.config.progress_callback.clone();

        let mut outcomes: Vec<FileOutcome> = stream::iter(files.into_iter().enumerate())
            .map(move |(index, file)| {
                let extractor = Arc::clone(&extractor);
                let cb = cb.clone();
                async move {
                    if let Some(ref cb) = cb {
                        cb.on_file_start(&file.name);
                    }
                    let text = extractor.extract(&file).await;
                    match &text {
                        Ok(t) => {
                            info!("Extracted {} chars from '{}'", t.chars().count(), file.name);
                            if let Some(ref cb) = cb {
                                cb.on_file_complete(&file.name, t.chars().count());
                            }
                        }
                        Err(e) => {
                            warn!("Error processing '{}': {}", file.name, e);
                            if let Some(ref cb) = cb {
                                cb.on_file_error(&file.name, &e.to_string());
                            }
                        }
                    }
                    FileOutcome {
                        index,
                        name: file.name,
                        text,
                    }
                }
            })
            .buffer_unordered(self.config.extraction_concurrency.max(1))
            .collect()
            .await;

        outcomes.sort_by_key(|o| o.index);
        outcomes
    }
}

/// Read local files into uploads, rejecting an oversized batch before any
/// file is read.
///
/// Count and size are checked from metadata first so a 2 GB file is never
/// pulled into memory just to be refused.
pub async fn read_uploads(
    paths: &[impl AsRef<Path>],
    config: &AnalysisConfig,
) -> Result<Vec<Upload>, AnalysisError> {
    if paths.is_empty() {
        return Err(AnalysisError::NoFiles);
    }
    if paths.len() > MAX_FILES {
        return Err(AnalysisError::TooManyFiles {
            count: paths.len(),
            max: MAX_FILES,
        });
    }

    let mut uploads = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| AnalysisError::FileNotFound {
                path: path.to_path_buf(),
            })?;
        if meta.len() > config.max_file_bytes {
            return Err(AnalysisError::FileTooLarge {
                name,
                size: meta.len(),
                max_mb: config.max_file_mb(),
            });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|_| AnalysisError::FileNotFound {
                path: path.to_path_buf(),
            })?;
        uploads.push(Upload::new(name, bytes));
    }
    Ok(uploads)
}

/// Read local files and analyze them with a fresh [`Analyzer`].
pub async fn analyze_paths(
    paths: &[impl AsRef<Path>],
    config: AnalysisConfig,
) -> Result<AnalysisOutput, AnalysisError> {
    let uploads = read_uploads(paths, &config).await?;
    Analyzer::new(config)?.analyze(uploads).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExtractionError, ModelError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoModel {
        prompts: Mutex<Vec<String>>,
        reply: Result<String, ModelError>,
    }

    #[async_trait]
    impl ModelClient for EchoModel {
        fn endpoint(&self) -> String {
            "mock://model".into()
        }
        fn model(&self) -> String {
            "mock".into()
        }
        async fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
        async fn probe(&self) -> Result<EndpointHealth, ModelError> {
            Ok(EndpointHealth {
                endpoint: self.endpoint(),
                model: self.model(),
                details: serde_json::json!({"models": []}),
            })
        }
    }

    /// Reads the staged bytes back as text; names containing "bad" fail.
    struct StagedTextExtractor;

    #[async_trait]
    impl TextExtractor for StagedTextExtractor {
        async fn extract(&self, file: &StagedFile) -> Result<String, ExtractionError> {
            if file.name.contains("bad") {
                return Err(ExtractionError::EmptyDocument { chars: 0 });
            }
            let bytes = std::fs::read(&file.path).map_err(|e| ExtractionError::Io(e.to_string()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }

    fn analyzer(dir: &Path, reply: Result<String, ModelError>) -> (Analyzer, Arc<EchoModel>) {
        let config = AnalysisConfig::builder()
            .scratch_dir(dir)
            .build()
            .unwrap();
        let model = Arc::new(EchoModel {
            prompts: Mutex::new(Vec::new()),
            reply,
        });
        let a = Analyzer::with_parts(config, model.clone(), Arc::new(StagedTextExtractor));
        (a, model)
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[tokio::test]
    async fn prompt_contains_blocks_in_upload_order() {
        let dir = tempfile::tempdir().unwrap();
        let (a, model) = analyzer(dir.path(), Ok(r#"{"summary":"s"}"#.into()));
        let out = a
            .analyze(vec![
                Upload::new("b.pdf", b"second text".to_vec()),
                Upload::new("a.png", b"first text".to_vec()),
            ])
            .await
            .unwrap();

        assert_eq!(out.processed_files, vec!["b.pdf", "a.png"]);
        let prompt = model.prompts.lock().unwrap()[0].clone();
        let b = prompt.find("### FILE: b.pdf\nsecond text").unwrap();
        let a_pos = prompt.find("### FILE: a.png\nfirst text").unwrap();
        assert!(b < a_pos);
        assert!(prompt.contains("second text\n\n---\n\n### FILE: a.png"));
        assert!(scratch_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn failed_file_is_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = analyzer(dir.path(), Ok("plain".into()));
        let out = a
            .analyze(vec![
                Upload::new("bad.pdf", b"x".to_vec()),
                Upload::new("good.pdf", b"readable".to_vec()),
            ])
            .await
            .unwrap();
        assert_eq!(out.processed_files, vec!["good.pdf"]);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].file, "bad.pdf");
        assert_eq!(out.stats.files_failed, 1);
        assert!(out.result.is_fallback());
        assert!(scratch_is_empty(dir.path()));
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn analysis_futures_are_send() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = analyzer(dir.path(), Ok(String::new()));
        assert_send(a.analyze(vec![]));
        assert_send(a.analyze_envelope(vec![]));
        assert_send(a.health());
    }

    #[tokio::test]
    async fn all_failures_skip_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let (a, model) = analyzer(dir.path(), Ok("{}".into()));
        let err = a
            .analyze(vec![Upload::new("bad.png", b"x".to_vec())])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ExtractionTotalFailure { total: 1, .. }));
        assert!(model.prompts.lock().unwrap().is_empty());
        assert!(scratch_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn model_error_is_terminal_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = analyzer(dir.path(), Err(ModelError::Timeout { secs: 120 }));
        let err = a
            .analyze(vec![Upload::new("r.pdf", b"text".to_vec())])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ModelTimeout { secs: 120, .. }));
        assert!(scratch_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn envelope_hides_details_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = analyzer(dir.path(), Err(ModelError::Unreachable("refused".into())));
        let env = a
            .analyze_envelope(vec![Upload::new("r.pdf", b"text".to_vec())])
            .await;
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["ok"], false);
        assert!(v.get("details").is_none());
        assert!(!v["error"].as_str().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn health_reports_model_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (a, _) = analyzer(dir.path(), Ok(String::new()));
        let h = a.health().await.unwrap();
        assert_eq!(h.model, "mock");
    }

    #[tokio::test]
    async fn read_uploads_rejects_missing_file() {
        let err = read_uploads(&["/definitely/not/here.pdf"], &AnalysisConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn read_uploads_checks_size_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        let config = AnalysisConfig::builder().max_file_bytes(16).build().unwrap();
        let err = read_uploads(&[&path], &config).await.unwrap_err();
        assert!(matches!(err, AnalysisError::FileTooLarge { size: 64, .. }));
    }

    #[test]
    fn stage_names_are_lowercase() {
        assert_eq!(Stage::Invoking.to_string(), "invoking");
        assert_eq!(Stage::Failed.to_string(), "failed");
    }
}
