//! Prompt assembly for medical report analysis.
//!
//! Every prompt and fixed user-facing sentence lives here so the wording can
//! be changed in one place and inspected by unit tests without a model.
//!
//! [`build_prompt`] is pure: it never truncates or summarises its input.
//! Size policy belongs to intake limits upstream and the model's own context
//! window downstream.

/// Separator placed between per-file blocks in the joined text.
pub const FILE_SEPARATOR: &str = "\n\n---\n\n";

/// Disclaimer used when the model omits one and in fallback results.
pub const DEFAULT_DISCLAIMER: &str = "This is an AI-generated analysis for educational purposes only. \
Always consult with your healthcare provider.";

/// Single key finding reported in fallback mode.
pub const FALLBACK_FINDING: &str = "Analysis completed. Please review the full response below.";

/// Summary used when the model returns nothing at all.
pub const EMPTY_RESPONSE_SUMMARY: &str = "The model returned an empty response.";

/// Summary used when a parsed response has no summary field.
pub const MISSING_SUMMARY: &str = "The model did not provide a summary.";

const PROMPT_HEADER: &str = r#"You are an expert medical report analyzer with particular experience in fertility and IVF reports. Analyze the medical documents below and produce a clear, patient-friendly summary.

IMPORTANT: Respond with ONLY a valid JSON object. Do not write any text before or after the JSON.

The JSON object must have exactly this structure:
{
  "summary": "3-4 sentences describing the overall findings in plain language a patient can follow",
  "key_findings": [
    "An important finding, quoting specific values where the report gives them",
    "Another important finding"
  ],
  "possible_red_flags": [
    "A value or finding that may need attention",
    "An abnormal result worth raising with the doctor"
  ],
  "recommended_followups": [
    "A test or examination that may be needed",
    "A suggested timeline for next steps"
  ],
  "questions_for_doctor": [
    "A relevant question the patient could ask their doctor",
    "Another question grounded in the findings"
  ],
  "disclaimer": "A short note that this analysis is educational and does not replace professional medical advice"
}

Guidelines:
- Be specific and quote actual values from the reports when they are available
- Prefer plain, non-technical language and briefly explain any medical term you use
- Stay objective and factual; do not cause unnecessary alarm
- State red flags clearly but neutrally
- Any of possible_red_flags, recommended_followups and questions_for_doctor may be an empty array

Extracted medical report contents:

"#;

const PROMPT_FOOTER: &str = "\n\nNow provide your analysis as a JSON object:";

/// Delimit one file's text with its source name.
///
/// The `### FILE:` line lets the model attribute findings to a document.
pub fn file_block(name: &str, text: &str) -> String {
    format!("### FILE: {name}\n{text}").trim().to_string()
}

/// Join per-file blocks in upload order.
pub fn join_blocks<S: AsRef<str>>(blocks: &[S]) -> String {
    blocks
        .iter()
        .map(|b| b.as_ref())
        .collect::<Vec<_>>()
        .join(FILE_SEPARATOR)
}

/// Build the full instruction text around the joined extracted contents.
pub fn build_prompt(joined_texts: &str) -> String {
    let mut prompt =
        String::with_capacity(PROMPT_HEADER.len() + joined_texts.len() + PROMPT_FOOTER.len());
    prompt.push_str(PROMPT_HEADER);
    prompt.push_str(joined_texts);
    prompt.push_str(PROMPT_FOOTER);
    prompt
}
