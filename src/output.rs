//! Result types returned by the analysis pipeline.
//!
//! [`AnalysisResult`] is the structured summary the model is asked for. Its
//! deserializer is deliberately forgiving: the model is untrusted for
//! structure, so list fields accept a bare string or `null`, scalar items
//! are stringified, and unknown fields are carried through untouched.
//! [`Envelope`] is the wire shape handed to HTTP and CLI callers.

use crate::error::{AnalysisError, ExtractionError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The structured summary of a batch of medical reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,

    #[serde(default, deserialize_with = "lenient_list")]
    pub key_findings: Vec<String>,

    #[serde(default, deserialize_with = "lenient_list")]
    pub possible_red_flags: Vec<String>,

    #[serde(default, deserialize_with = "lenient_list")]
    pub recommended_followups: Vec<String>,

    #[serde(default, deserialize_with = "lenient_list")]
    pub questions_for_doctor: Vec<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub disclaimer: String,

    /// Verbatim model output; present only when the response could not be
    /// parsed and the result was synthesised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,

    /// Fields the model added beyond the schema, passed through as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisResult {
    /// True when this result was synthesised from unparseable model output.
    pub fn is_fallback(&self) -> bool {
        self.raw_response.is_some()
    }
}

fn value_to_text(v: Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_string<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(de)?;
    Ok(value_to_text(v).unwrap_or_default())
}

fn lenient_list<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(de)?;
    Ok(match v {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(value_to_text)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        other => value_to_text(other).into_iter().collect(),
    })
}

/// A file that failed extraction, kept as a diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub error: ExtractionError,
}

/// Timing and volume figures for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub files_received: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    /// Characters of joined text sent to the model (excluding instructions).
    pub extracted_chars: usize,
    pub extraction_duration_ms: u64,
    pub model_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a successful analysis produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub result: AnalysisResult,
    /// Original names of the files that contributed text, in upload order.
    pub processed_files: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub stats: AnalysisStats,
}

/// Wire envelope for inbound callers.
///
/// ```json
/// { "ok": true, "format": "json", "data": { … }, "processed_files": ["a.pdf"] }
/// { "ok": false, "error": "No files uploaded" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Success {
        ok: bool,
        format: String,
        data: AnalysisResult,
        processed_files: Vec<String>,
    },
    Failure {
        ok: bool,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl Envelope {
    pub fn success(output: AnalysisOutput) -> Self {
        Envelope::Success {
            ok: true,
            format: "json".to_string(),
            data: output.result,
            processed_files: output.processed_files,
        }
    }

    /// Failure envelope; technical detail only when `expose_details` is set.
    pub fn failure(err: &AnalysisError, expose_details: bool) -> Self {
        Envelope::Failure {
            ok: false,
            error: err.user_message(),
            details: expose_details.then(|| format!("{err:?}")),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }
}
