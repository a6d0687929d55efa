use std::fs::File;
use std::io::{Read, BufReader};
use std::path::Path;
use sha2::{Sha256, Digest};
use memmap2::MmapOptions;
use anyhow::{Result, Context};

const MMAP_THRESHOLD: u64 = 256 * 1024 * 1024; // 256 MB
const TAG_LEN: usize = 16;

/// Content hash of a source video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDigest {
    pub sha256: String,
}

impl VideoDigest {
    /// Short tag a trial is stored under when the caller does not name it.
    pub fn tag(&self) -> &str {
        &self.sha256[..TAG_LEN.min(self.sha256.len())]
    }
}

pub fn hash_video(path: &Path) -> Result<VideoDigest> {
    let file = File::open(path).with_context(|| format!("Failed to open video: {:?}", path))?;
    let len = file.metadata()?.len();

    let mut hasher = Sha256::new();

    if len > MMAP_THRESHOLD {
        // Recordings are not modified while they are being compared.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        hasher.update(&mmap);
    } else {
        let mut reader = BufReader::new(file);
        let mut buffer = [0; 8192];
        loop {
            let count = reader.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            hasher.update(&buffer[..count]);
        }
    }

    Ok(VideoDigest {
        sha256: hex::encode(hasher.finalize()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_hash_and_tag() -> Result<()> {
        let path = std::env::temp_dir().join(format!("motion-diff-hash-{}.bin", std::process::id()));
        fs::write(&path, b"abc")?;

        let digest = hash_video(&path)?;
        assert_eq!(
            digest.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest.tag(), "ba7816bf8f01cfea");

        fs::remove_file(path)?;
        Ok(())
    }
}
