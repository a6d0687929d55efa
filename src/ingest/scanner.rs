use walkdir::{WalkDir, DirEntry};
use std::path::{Path, PathBuf};
use anyhow::Result;

use crate::media::mimetype;

/// Video files under `root`, sorted by path. Hidden files and directories are skipped.
pub fn scan_videos(root: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root).sort_by_file_name().into_iter();

    let mut videos = Vec::new();
    for entry in walker.filter_entry(|e| e.depth() == 0 || !is_hidden(e)) {
        let entry = entry?;
        if entry.file_type().is_file() && mimetype::is_video(entry.path()) {
            videos.push(entry.path().to_path_buf());
        }
    }
    Ok(videos)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name()
         .to_str()
         .map(|s| s.starts_with('.'))
         .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MP4_HEADER: [u8; 16] = [0, 0, 0, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0, 0, 0, 0];

    #[test]
    fn test_scan_finds_visible_videos() -> Result<()> {
        let root = std::env::temp_dir().join(format!("motion-diff-scan-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("week1"))?;
        fs::create_dir_all(root.join(".cache"))?;

        fs::write(root.join("week1/b.mp4"), MP4_HEADER)?;
        fs::write(root.join("a.mp4"), MP4_HEADER)?;
        fs::write(root.join(".cache/c.mp4"), MP4_HEADER)?;
        fs::write(root.join("notes.txt"), "practice log")?;

        let videos = scan_videos(&root)?;
        assert_eq!(videos, vec![root.join("a.mp4"), root.join("week1/b.mp4")]);

        fs::remove_dir_all(root)?;
        Ok(())
    }
}
