//! Pipeline stages for medical report analysis.
//!
//! Each submodule implements exactly one step, so each can be tested alone
//! and swapped (e.g. a different OCR engine) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! intake ──▶ extract ──▶ (prompts) ──▶ llm ──▶ coerce
//! (validate,   (pdf | ocr)   (build)     (model)  (JSON or fallback)
//!  stage)
//! ```
//!
//! 1. [`intake`]: reject bad batches before any I/O, then write uploads to
//!    transient storage behind a guard that deletes them on drop
//! 2. [`extract`]: dispatch by extension to [`pdf`] (PDFium text layer,
//!    `spawn_blocking`) or [`ocr`] (preprocess + Tesseract), then normalize
//! 3. [`llm`]: one bounded call to the model endpoint; the only stage
//!    with network I/O
//! 4. [`coerce`]: turn untrusted text into a result, never failing

pub mod coerce;
pub mod extract;
pub mod intake;
pub mod llm;
pub mod ocr;
pub mod pdf;
