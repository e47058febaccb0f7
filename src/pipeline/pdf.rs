//! PDF text extraction via PDFium's native text layer.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the PDFium C++ library, which keeps thread-local
//! state and blocks while parsing. The work is moved onto Tokio's blocking
//! pool so async worker threads never stall on a large report.
//!
//! Scanned PDFs without a text layer come back (nearly) empty and are
//! rejected by the minimum-length guard in [`crate::pipeline::extract`].

use crate::error::ExtractionError;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Extract the text of every page, pages joined by a blank line.
///
/// The returned text is raw; callers normalize it.
pub async fn extract_pdf_text(pdf_path: &Path) -> Result<String, ExtractionError> {
    let path = pdf_path.to_path_buf();

    tokio::task::spawn_blocking(move || extract_pdf_text_blocking(&path))
        .await
        .map_err(|e| ExtractionError::Internal(format!("PDF task panicked: {e}")))?
}

/// Blocking implementation of text extraction.
fn extract_pdf_text_blocking(pdf_path: &Path) -> Result<String, ExtractionError> {
    let pdfium = load_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(map_load_error)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let mut texts = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let text = page.text().map(|t| t.all()).map_err(|e| {
            ExtractionError::Pdf(format!("page {}: {:?}", idx + 1, e))
        })?;
        debug!("Page {} → {} chars", idx + 1, text.len());
        texts.push(text);
    }

    Ok(texts.join("\n\n"))
}

/// Bind to the PDFium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` (explicit path to the library file)
/// 2. The directory of the running executable
/// 3. The system library search path
fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            ExtractionError::Pdf(format!("failed to load PDFium from {path}: {e}"))
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let lib_path =
            Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            debug!(dir = %exe_dir.display(), "Loaded PDFium next to executable");
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(|e| {
        ExtractionError::Pdf(format!(
            "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// Map PDF load errors, singling out password-protected documents.
fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = format!("{e:?}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::Encrypted
    } else {
        ExtractionError::Pdf(format!("failed to load PDF: {msg}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_an_extraction_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let result = extract_pdf_text(&dir.path().join("absent.pdf")).await;
        // Either PDFium is unavailable or the file cannot be opened; both are
        // reported as per-file errors.
        assert!(matches!(result, Err(ExtractionError::Pdf(_))));
    }
}
