use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::error::{MotionError, MotionResult};

/// Bundles files into a single archive.
pub trait Archiver {
    fn archive(&self, inputs: &[PathBuf], destination: &Path) -> MotionResult<PathBuf>;
}

/// Writes a gzip-compressed tarball with every input stored under its file name.
#[derive(Debug, Clone, Default)]
pub struct TarGzArchiver {
    level: Option<u32>,
}

impl TarGzArchiver {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Some(level.min(9)),
        }
    }
}

impl Archiver for TarGzArchiver {
    fn archive(&self, inputs: &[PathBuf], destination: &Path) -> MotionResult<PathBuf> {
        // Check everything up front so a missing input never leaves a partial archive behind.
        if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
            return Err(MotionError::ArchiveInputMissing {
                path: missing.clone(),
            });
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let compression = self.level.map(Compression::new).unwrap_or_default();
        let encoder = GzEncoder::new(File::create(destination)?, compression);
        let mut builder = tar::Builder::new(encoder);

        for input in inputs {
            let name = input
                .file_name()
                .ok_or_else(|| MotionError::ArchiveInputMissing { path: input.clone() })?;
            builder.append_path_with_name(input, name)?;
        }

        builder.into_inner()?.finish()?;

        info!(files = inputs.len(), archive = %destination.display(), "Archive written");
        Ok(destination.to_path_buf())
    }
}
