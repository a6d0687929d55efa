use std::path::Path;
use anyhow::{Result, Context, bail};
use infer;

pub fn detect_mimetype(path: &Path) -> Result<String> {
    let kind = infer::get_from_path(path)
        .context("Failed to read file for mimetype detection")?;

    match kind {
        Some(k) => Ok(k.mime_type().to_string()),
        None => Ok("application/octet-stream".to_string()),
    }
}

pub fn is_video(path: &Path) -> bool {
    detect_mimetype(path)
        .map(|m| m.starts_with("video/"))
        .unwrap_or(false)
}

/// Fails unless the file content sniffs as a video container.
pub fn ensure_video(path: &Path) -> Result<String> {
    let mime = detect_mimetype(path)?;
    if !mime.starts_with("video/") {
        bail!("{:?} is not a video (detected {})", path, mime);
    }
    Ok(mime)
}
