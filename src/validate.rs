use std::path::Path;

use crate::error::{RenderError, Result};

pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"];
pub const MAX_AUDIO_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Check that `path` is a plausible audio input before any decoding.
/// Returns the file size in bytes.
pub fn validate_audio(path: &Path) -> Result<u64> {
    let reject = |reason: String| RenderError::AudioValidation {
        path: path.to_path_buf(),
        reason,
    };

    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => reject("file not found".into()),
        _ => reject(format!("cannot stat file: {e}")),
    })?;
    if !meta.is_file() {
        return Err(reject("not a regular file".into()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(reject(format!(
            "unsupported format '.{}'; supported: {}",
            ext,
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    let size = meta.len();
    if size == 0 {
        return Err(reject("file is empty".into()));
    }
    if size > MAX_AUDIO_BYTES {
        return Err(reject(format!(
            "file too large ({:.0} MB, maximum 2 GB)",
            size as f64 / (1024.0 * 1024.0)
        )));
    }

    log::debug!(
        "Audio file validated: {} ({:.1} MB)",
        path.display(),
        size as f64 / (1024.0 * 1024.0)
    );
    Ok(size)
}
