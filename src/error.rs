//! Error types for the edgequake-medreport library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`AnalysisError`] (**fatal**): the request cannot produce a result
//!   (bad batch, nothing extractable, model unreachable). Returned as
//!   `Err(AnalysisError)` from [`crate::analyze::Analyzer::analyze`].
//!
//! * [`ExtractionError`] (**non-fatal**): one file could not be read, but the
//!   rest of the batch is fine. Recorded in
//!   [`crate::output::FileFailure`] and the batch continues.
//!
//! * [`ModelError`]: a single call to the model endpoint failed. The
//!   orchestrator lifts it into the matching [`AnalysisError`] variant.
//!
//! Every [`AnalysisError`] has a short, non-technical [`AnalysisError::user_message`]
//! for callers and a full `Display` form for logs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a fatal error, stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ExtractionTotalFailure,
    ModelUnreachable,
    ModelTimeout,
    ModelBadResponse,
    Internal,
}

/// All fatal errors returned by the analysis pipeline.
#[derive(Debug, Error)]
pub enum AnalysisError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// A local input file was not found or could not be read.
    #[error("File not found or unreadable: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The request carried no files at all.
    #[error("No files uploaded")]
    NoFiles,

    /// More files than the per-request cap.
    #[error("Too many files: {count} uploaded, at most {max} allowed per request")]
    TooManyFiles { count: usize, max: usize },

    /// One file exceeds the configured size ceiling.
    #[error("File '{name}' is {size} bytes, larger than the {max_mb} MB limit")]
    FileTooLarge { name: String, size: u64, max_mb: u64 },

    /// One file's extension is not in the supported set.
    #[error("Unsupported file '{name}': only PDF / PNG / JPG / JPEG / WEBP allowed")]
    UnsupportedFileType { name: String },

    /// The request body could not be read as a file upload.
    #[error("Malformed upload: {0}")]
    MalformedRequest(String),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Every file in the batch failed extraction.
    #[error("Could not extract text from any of the {total} uploaded files.\nFirst error: {first_error}")]
    ExtractionTotalFailure { total: usize, first_error: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The endpoint could not be reached at all.
    #[error("Model endpoint '{endpoint}' is not reachable: {detail}")]
    ModelUnreachable { endpoint: String, detail: String },

    /// The endpoint did not answer within the configured bound.
    #[error("Model endpoint '{endpoint}' did not respond within {secs}s")]
    ModelTimeout { endpoint: String, secs: u64 },

    /// The endpoint answered, but not with a usable body.
    #[error("Model endpoint '{endpoint}' returned an unusable response: {detail}")]
    ModelBadResponse { endpoint: String, detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Could not write an upload into transient storage.
    #[error("Failed to stage upload '{path}': {source}")]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The named hosted provider could not be created.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Lift a per-call model error into the request-level error.
    pub fn from_model(endpoint: impl Into<String>, err: ModelError) -> Self {
        let endpoint = endpoint.into();
        match err {
            ModelError::Unreachable(detail) => Self::ModelUnreachable { endpoint, detail },
            ModelError::Timeout { secs } => Self::ModelTimeout { endpoint, secs },
            ModelError::BadResponse(detail) => Self::ModelBadResponse { endpoint, detail },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound { .. }
            | Self::NoFiles
            | Self::TooManyFiles { .. }
            | Self::FileTooLarge { .. }
            | Self::UnsupportedFileType { .. }
            | Self::MalformedRequest(_) => ErrorKind::Validation,
            Self::ExtractionTotalFailure { .. } => ErrorKind::ExtractionTotalFailure,
            Self::ModelUnreachable { .. } => ErrorKind::ModelUnreachable,
            Self::ModelTimeout { .. } => ErrorKind::ModelTimeout,
            Self::ModelBadResponse { .. } => ErrorKind::ModelBadResponse,
            Self::StagingFailed { .. }
            | Self::InvalidConfig(_)
            | Self::ProviderNotConfigured { .. }
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Short message safe to show an end user.
    ///
    /// Validation messages are already user-facing and pass through as-is;
    /// everything else is replaced by a fixed sentence so paths, endpoints
    /// and library errors never leak.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation => self.to_string(),
            ErrorKind::ExtractionTotalFailure => "Could not extract text from any of the uploaded files. \
                 Please ensure files are readable and contain text."
                .to_string(),
            ErrorKind::ModelUnreachable => {
                "The analysis model is not reachable. Make sure the model service is running."
                    .to_string()
            }
            ErrorKind::ModelTimeout => {
                "The analysis model took too long to respond. Please try again.".to_string()
            }
            ErrorKind::ModelBadResponse => {
                "The analysis model returned an unexpected response. Please try again.".to_string()
            }
            ErrorKind::Internal => "Failed to analyze files".to_string(),
        }
    }
}

/// A non-fatal error for a single file.
///
/// Stored in [`crate::output::FileFailure`]; the batch continues unless
/// every file fails.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ExtractionError {
    /// Extension is not one of the supported kinds.
    #[error("unsupported file type '{extension}'")]
    UnsupportedType { extension: String },

    /// Extraction ran, but produced fewer than the minimum characters.
    #[error("document appears to be empty or contains no readable text ({chars} chars)")]
    EmptyDocument { chars: usize },

    /// The PDF is password protected.
    #[error("PDF is encrypted")]
    Encrypted,

    /// PDFium could not be bound or the document could not be parsed.
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    /// Image could not be decoded or preprocessed.
    #[error("image preprocessing failed: {0}")]
    Image(String),

    /// The OCR engine binary could not be started.
    #[error("OCR engine '{binary}' is not available: {detail}")]
    OcrUnavailable { binary: String, detail: String },

    /// The OCR engine ran but reported failure.
    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("internal extraction error: {0}")]
    Internal(String),
}

/// Failure of a single call to the model endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("bad response: {0}")]
    BadResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_files_display() {
        let e = AnalysisError::TooManyFiles { count: 11, max: 10 };
        let msg = e.to_string();
        assert!(msg.contains("11"), "got: {msg}");
        assert!(msg.contains("10"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::Validation);
    }

    #[test]
    fn validation_message_passes_through() {
        let e = AnalysisError::UnsupportedFileType {
            name: "notes.docx".into(),
        };
        assert_eq!(e.user_message(), e.to_string());
        assert!(e.user_message().contains("notes.docx"));
    }

    #[test]
    fn model_errors_map_to_kinds() {
        let cases = [
            (ModelError::Unreachable("refused".into()), ErrorKind::ModelUnreachable),
            (ModelError::Timeout { secs: 120 }, ErrorKind::ModelTimeout),
            (ModelError::BadResponse("HTTP 500".into()), ErrorKind::ModelBadResponse),
        ];
        for (err, kind) in cases {
            let lifted = AnalysisError::from_model("http://localhost:11434", err);
            assert_eq!(lifted.kind(), kind);
        }
    }

    #[test]
    fn timeout_display_names_endpoint_and_bound() {
        let e = AnalysisError::from_model("http://ollama:11434", ModelError::Timeout { secs: 120 });
        assert!(e.to_string().contains("120s"));
        assert!(e.to_string().contains("http://ollama:11434"));
    }

    #[test]
    fn internal_details_never_reach_user_message() {
        let e = AnalysisError::StagingFailed {
            path: PathBuf::from("/var/tmp/uploads/1_secret.pdf"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert_eq!(e.kind(), ErrorKind::Internal);
        assert!(!e.user_message().contains("secret"));
        assert!(!e.user_message().contains("disk full"));
    }

    #[test]
    fn error_kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ExtractionTotalFailure).unwrap();
        assert_eq!(json, "\"extraction_total_failure\"");
    }
}
