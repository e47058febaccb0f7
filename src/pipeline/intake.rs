//! Intake: validate an inbound batch, then stage it to transient storage.
//!
//! ## Why validate before writing?
//!
//! Count, size and type checks only need the name and length of each upload.
//! Running them first means an oversized or malformed batch is rejected
//! without a single byte hitting the disk.
//!
//! ## Cleanup
//!
//! [`StagedBatch`] owns every file it writes. Dropping it deletes them, so
//! cleanup runs on every exit route of the orchestrator: success, error,
//! panic, or the request future being dropped mid-flight.

use crate::config::{AnalysisConfig, MAX_FILES};
use crate::error::AnalysisError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Extraction strategy a file is routed to, decided by extension only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
}

impl FileKind {
    /// Classify by case-insensitive extension. No content sniffing.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "png" | "jpg" | "jpeg" | "webp" => Some(FileKind::Image),
            _ => None,
        }
    }
}

/// An inbound file that has not been written anywhere yet.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Original file name as supplied by the caller.
    pub name: String,
    /// Declared media type, recorded but not used for dispatch.
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: None,
            bytes,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Reject a batch whose shape is wrong. Touches no storage.
pub fn validate_batch(uploads: &[Upload], config: &AnalysisConfig) -> Result<(), AnalysisError> {
    if uploads.is_empty() {
        return Err(AnalysisError::NoFiles);
    }
    if uploads.len() > MAX_FILES {
        return Err(AnalysisError::TooManyFiles {
            count: uploads.len(),
            max: MAX_FILES,
        });
    }
    for upload in uploads {
        if upload.size() > config.max_file_bytes {
            return Err(AnalysisError::FileTooLarge {
                name: upload.name.clone(),
                size: upload.size(),
                max_mb: config.max_file_mb(),
            });
        }
        if FileKind::from_name(&upload.name).is_none() {
            return Err(AnalysisError::UnsupportedFileType {
                name: upload.name.clone(),
            });
        }
    }
    Ok(())
}

static RE_UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-() ]+").unwrap());

/// Replace runs of characters outside `[A-Za-z0-9_.-() ]` with `_`.
///
/// Path separators are among the replaced characters, so the result is
/// always a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let safe = RE_UNSAFE_CHARS.replace_all(name, "_").to_string();
    match safe.as_str() {
        "" | "." | ".." => "upload".to_string(),
        _ => safe,
    }
}

/// A validated upload written to transient storage.
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Original name; this is the file identifier reported to callers.
    pub name: String,
    pub path: PathBuf,
    pub media_type: Option<String>,
    pub size: u64,
    pub kind: FileKind,
}

/// Owns the staged files of one request and deletes them when dropped.
#[derive(Debug)]
pub struct StagedBatch {
    files: Vec<StagedFile>,
}

impl StagedBatch {
    /// Write every upload to `dir` as `<unix-millis>_<sanitized name>`.
    ///
    /// Call only after [`validate_batch`] succeeded. If a write fails part
    /// way, the files already written are removed before returning.
    pub fn stage(uploads: Vec<Upload>, dir: &Path) -> Result<Self, AnalysisError> {
        std::fs::create_dir_all(dir).map_err(|source| AnalysisError::StagingFailed {
            path: dir.to_path_buf(),
            source,
        })?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let mut batch = StagedBatch {
            files: Vec::with_capacity(uploads.len()),
        };
        for upload in uploads {
            let kind = FileKind::from_name(&upload.name).ok_or_else(|| {
                AnalysisError::UnsupportedFileType {
                    name: upload.name.clone(),
                }
            })?;
            let path = write_unique(dir, millis, &sanitize_filename(&upload.name), &upload.bytes)?;
            debug!("Staged '{}' → {}", upload.name, path.display());
            batch.files.push(StagedFile {
                size: upload.size(),
                name: upload.name,
                path,
                media_type: upload.media_type,
                kind,
            });
        }
        Ok(batch)
    }

    /// [`stage`](Self::stage) on the blocking pool.
    ///
    /// If the caller is dropped mid-write, the batch is dropped when the
    /// blocking task finishes, which removes whatever was written.
    pub async fn stage_async(uploads: Vec<Upload>, dir: PathBuf) -> Result<Self, AnalysisError> {
        tokio::task::spawn_blocking(move || Self::stage(uploads, &dir))
            .await
            .map_err(|e| AnalysisError::Internal(format!("Staging task panicked: {e}")))?
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Delete every staged file now. Idempotent; also runs on drop.
    pub fn cleanup(&mut self) {
        remove_staged(std::mem::take(&mut self.files));
    }

    /// [`cleanup`](Self::cleanup) on the blocking pool.
    ///
    /// The file list moves into the blocking task before the first await,
    /// so the deletions complete even if this future is dropped.
    pub async fn cleanup_async(&mut self) {
        let files = std::mem::take(&mut self.files);
        if files.is_empty() {
            return;
        }
        if let Err(e) = tokio::task::spawn_blocking(move || remove_staged(files)).await {
            warn!("Cleanup task failed: {}", e);
        }
    }
}

fn remove_staged(files: Vec<StagedFile>) {
    for file in files {
        match std::fs::remove_file(&file.path) {
            Ok(()) => debug!("Removed staged file {}", file.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not delete {}: {}", file.path.display(), e),
        }
    }
}

impl Drop for StagedBatch {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Create `<millis>_<safe>` exclusively, bumping a counter on collision.
fn write_unique(dir: &Path, millis: u128, safe: &str, bytes: &[u8]) -> Result<PathBuf, AnalysisError> {
    let mut attempt = 0u32;
    loop {
        let file_name = if attempt == 0 {
            format!("{millis}_{safe}")
        } else {
            format!("{millis}-{attempt}_{safe}")
        };
        let path = dir.join(file_name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                if let Err(source) = f.write_all(bytes).and_then(|_| f.flush()) {
                    let _ = std::fs::remove_file(&path);
                    return Err(AnalysisError::StagingFailed { path, source });
                }
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 1000 => {
                attempt += 1;
            }
            Err(source) => return Err(AnalysisError::StagingFailed { path, source }),
        }
    }
}
