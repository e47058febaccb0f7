//! Response coercion: untrusted model text → [`AnalysisResult`].
//!
//! Models asked for "JSON only" still wrap it in prose, add fences, drop
//! fields or answer in plain text. [`coerce`] never fails: it takes the
//! widest brace-delimited span, parses it leniently, and otherwise builds a
//! fallback result that keeps the raw text so nothing is lost.

use crate::output::AnalysisResult;
use crate::prompts::{
    DEFAULT_DISCLAIMER, EMPTY_RESPONSE_SUMMARY, FALLBACK_FINDING, MISSING_SUMMARY,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Characters of raw text kept in a fallback summary.
pub const FALLBACK_SUMMARY_CHARS: usize = 500;

/// Convert raw model output into a result. Pure and idempotent.
pub fn coerce(raw: &str) -> AnalysisResult {
    match parse_embedded_object(raw) {
        Some(mut result) => {
            debug!("Parsed structured response");
            if result.summary.trim().is_empty() {
                result.summary = MISSING_SUMMARY.to_string();
            }
            if result.disclaimer.trim().is_empty() {
                result.disclaimer = DEFAULT_DISCLAIMER.to_string();
            }
            result
        }
        None => {
            warn!("No parseable JSON object in model response; using fallback");
            fallback(raw)
        }
    }
}

/// The substring from the first `{` to the last `}`, if any.
pub fn brace_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse the brace span as a JSON object and read it as a result.
///
/// Any object is accepted; missing fields take their defaults. A
/// `raw_response` key from the model is discarded: only [`fallback`] sets
/// that field.
fn parse_embedded_object(raw: &str) -> Option<AnalysisResult> {
    let span = brace_span(raw)?;
    let mut object: Map<String, Value> = match serde_json::from_str(span) {
        Ok(obj) => obj,
        Err(e) => {
            debug!("Brace span is not valid JSON: {}", e);
            return None;
        }
    };
    if object.remove("raw_response").is_some() {
        debug!("Dropped model-supplied raw_response");
    }
    serde_json::from_value(Value::Object(object)).ok()
}

/// Build the degraded-but-successful result for unparseable text.
pub fn fallback(raw: &str) -> AnalysisResult {
    let summary = if raw.trim().is_empty() {
        EMPTY_RESPONSE_SUMMARY.to_string()
    } else {
        truncate_chars(raw, FALLBACK_SUMMARY_CHARS)
    };

    AnalysisResult {
        summary,
        key_findings: vec![FALLBACK_FINDING.to_string()],
        possible_red_flags: Vec::new(),
        recommended_followups: Vec::new(),
        questions_for_doctor: Vec::new(),
        disclaimer: DEFAULT_DISCLAIMER.to_string(),
        raw_response: Some(raw.to_string()),
        extra: Map::new(),
    }
}

/// First `max` characters, with `...` appended when anything was cut.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}
