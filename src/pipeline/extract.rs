//! Text extraction: one capability, two strategies.
//!
//! [`TextExtractor`] is the seam the orchestrator depends on: "produce text
//! from a staged file, or fail". [`DocumentExtractor`] is the production
//! implementation, routing by [`FileKind`] to the PDFium text layer or to
//! preprocessed Tesseract OCR. Both strategies finish with the same
//! [`normalize_text`] pass and the same minimum-length guard.

use crate::config::AnalysisConfig;
use crate::error::ExtractionError;
use crate::pipeline::intake::{FileKind, StagedFile};
use crate::pipeline::{ocr, pdf};
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Produce normalized text from a staged file.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, file: &StagedFile) -> Result<String, ExtractionError>;
}

/// Dispatches PDFs to PDFium and images to Tesseract.
#[derive(Clone)]
pub struct DocumentExtractor {
    ocr_language: String,
    tesseract_path: PathBuf,
    min_text_chars: usize,
    progress: Option<ProgressCallback>,
}

impl DocumentExtractor {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            ocr_language: config.ocr_language.clone(),
            tesseract_path: config.tesseract_path.clone(),
            min_text_chars: config.min_text_chars,
            progress: config.progress_callback.clone(),
        }
    }

    /// Extract a file that was not staged through intake, dispatching on
    /// its extension.
    pub async fn extract_path(&self, path: &Path) -> Result<String, ExtractionError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = FileKind::from_name(&name).ok_or_else(|| ExtractionError::UnsupportedType {
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })?;
        let size = std::fs::metadata(path)
            .map_err(|e| ExtractionError::Io(e.to_string()))?
            .len();
        let file = StagedFile {
            name,
            path: path.to_path_buf(),
            media_type: None,
            size,
            kind,
        };
        self.extract(&file).await
    }
}

#[async_trait]
impl TextExtractor for DocumentExtractor {
    async fn extract(&self, file: &StagedFile) -> Result<String, ExtractionError> {
        let raw = match file.kind {
            FileKind::Pdf => pdf::extract_pdf_text(&file.path).await?,
            FileKind::Image => {
                let progress = self.progress.clone();
                let name = file.name.clone();
                let report = move |percent: u8| {
                    if let Some(ref cb) = progress {
                        cb.on_ocr_progress(&name, percent);
                    }
                };
                ocr::recognize_image(&file.path, &self.tesseract_path, &self.ocr_language, &report)
                    .await?
            }
        };
        ensure_readable(normalize_text(&raw), self.min_text_chars)
    }
}

static RE_TRAILING_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+\n").unwrap());
static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize extracted text.
///
/// 1. CRLF and lone CR become LF
/// 2. Trailing spaces/tabs are dropped from every line
/// 3. Runs of three or more newlines collapse to exactly two
/// 4. Leading and trailing whitespace is trimmed
pub fn normalize_text(input: &str) -> String {
    let s = input.replace("\r\n", "\n").replace('\r', "\n");
    let s = RE_TRAILING_WS.replace_all(&s, "\n");
    let s = RE_BLANK_RUNS.replace_all(&s, "\n\n");
    s.trim().to_string()
}

/// Reject text shorter than `min_chars` characters.
pub fn ensure_readable(text: String, min_chars: usize) -> Result<String, ExtractionError> {
    let chars = text.chars().count();
    if text.is_empty() || chars < min_chars {
        return Err(ExtractionError::EmptyDocument { chars });
    }
    Ok(text)
}
