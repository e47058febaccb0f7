//! Image OCR: fixed preprocessing, then Tesseract.
//!
//! Phone photos and scans of lab reports are often grey, low-contrast and
//! slightly blurred. Three cheap passes make Tesseract markedly more
//! reliable on them:
//!
//! 1. grayscale (colour carries no text information)
//! 2. contrast normalization (stretch the darkest/lightest pixels to 0/255)
//! 3. sharpen (unsharp mask)
//!
//! The preprocessed image is written as a lossless PNG into a private temp
//! directory and handed to the `tesseract` binary. The child process is
//! killed if the extraction future is dropped.

use crate::error::ExtractionError;
use image::{DynamicImage, GrayImage};
use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Progress checkpoints reported during recognition.
const PROGRESS_START: u8 = 0;
const PROGRESS_PREPROCESSED: u8 = 30;
const PROGRESS_DONE: u8 = 100;

/// Preprocess an image file and run OCR on it.
///
/// `progress` receives coarse percentages (0, 30, 100). They are
/// diagnostic only.
pub async fn recognize_image(
    image_path: &Path,
    tesseract: &Path,
    language: &str,
    progress: &(dyn Fn(u8) + Send + Sync),
) -> Result<String, ExtractionError> {
    progress(PROGRESS_START);

    let path = image_path.to_path_buf();
    let png = tokio::task::spawn_blocking(move || preprocess_file(&path))
        .await
        .map_err(|e| ExtractionError::Internal(format!("Preprocess task panicked: {e}")))??;
    progress(PROGRESS_PREPROCESSED);
    info!("OCR progress {}%: {}", PROGRESS_PREPROCESSED, image_path.display());

    let work_dir = tempfile::tempdir().map_err(|e| ExtractionError::Io(e.to_string()))?;
    let input = work_dir.path().join("preprocessed.png");
    tokio::fs::write(&input, &png)
        .await
        .map_err(|e| ExtractionError::Io(e.to_string()))?;

    let text = run_tesseract(tesseract, &input, language).await?;
    progress(PROGRESS_DONE);
    info!("OCR progress {}%: {} chars", PROGRESS_DONE, text.len());
    Ok(text)
}

/// Decode, preprocess and PNG-encode an image file.
pub fn preprocess_file(path: &Path) -> Result<Vec<u8>, ExtractionError> {
    let img = image::open(path).map_err(|e| ExtractionError::Image(e.to_string()))?;
    let processed = preprocess(&img);
    debug!(
        "Preprocessed {} → {}x{} grayscale",
        path.display(),
        processed.width(),
        processed.height()
    );

    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(processed)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| ExtractionError::Image(e.to_string()))?;
    Ok(buf)
}

/// Grayscale → normalize → sharpen.
pub fn preprocess(img: &DynamicImage) -> GrayImage {
    let mut gray = img.to_luma8();
    normalize_contrast(&mut gray);
    image::imageops::unsharpen(&gray, 1.0, 1)
}

/// Linear stretch so the darkest pixel maps to 0 and the lightest to 255.
///
/// Flat images (all one value) are left untouched.
pub fn normalize_contrast(img: &mut GrayImage) {
    let (min, max) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if max <= min {
        return;
    }
    let range = (max - min) as u32;
    for p in img.pixels_mut() {
        p[0] = (((p[0] - min) as u32 * 255) / range) as u8;
    }
}

async fn run_tesseract(binary: &Path, input: &Path, language: &str) -> Result<String, ExtractionError> {
    let output = Command::new(binary)
        .arg(input)
        .arg("stdout")
        .arg("-l")
        .arg(language)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ExtractionError::OcrUnavailable {
            binary: binary.display().to_string(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractionError::Ocr(stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
