use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{MotionError, MotionResult};

/// Kind of per-frame image stored for a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Raw sampled frame.
    Picture,
    /// Skeleton drawn on a blank canvas.
    Skeleton,
    /// Skeleton drawn over the raw frame.
    Overlay,
}

impl AssetKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Picture => "pictures",
            Self::Skeleton => "skeletons",
            Self::Overlay => "overlays",
        }
    }
}

impl FromStr for AssetKind {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "picture" | "pictures" => Ok(Self::Picture),
            "skeleton" | "skeletons" => Ok(Self::Skeleton),
            "overlay" | "overlays" => Ok(Self::Overlay),
            other => Err(MotionError::config(format!("unknown asset kind '{other}'"))),
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Maps frame numbers to image file names.
pub trait FrameNaming: Send + Sync {
    fn file_name(&self, frame_number: usize) -> String;
}

/// `<prefix><n>.<extension>`, e.g. `12.jpg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedFrames {
    pub prefix: String,
    pub extension: String,
}

impl Default for NumberedFrames {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            extension: "jpg".to_string(),
        }
    }
}

impl FrameNaming for NumberedFrames {
    fn file_name(&self, frame_number: usize) -> String {
        format!("{}{}.{}", self.prefix, frame_number, self.extension)
    }
}

const MAX_TAG_LEN: usize = 128;

/// Checks that a recording tag names a single directory entry below a root.
///
/// Allowed: ASCII letters, digits, `-`, `_` and `.`, not starting with `.`.
pub fn validate_tag(tag: &str) -> MotionResult<()> {
    let invalid = |reason| {
        Err(MotionError::InvalidTag {
            tag: tag.to_string(),
            reason,
        })
    };
    if tag.is_empty() {
        return invalid("tag is empty");
    }
    if tag.len() > MAX_TAG_LEN {
        return invalid("tag is longer than 128 characters");
    }
    if tag.starts_with('.') {
        return invalid("tag must not start with '.'");
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return invalid("only letters, digits, '-', '_' and '.' are allowed");
    }
    Ok(())
}

const STAGING_DIR: &str = ".staging";

/// Directory layout of extracted recordings under one media root:
/// `<root>/<tag>/{pictures,skeletons,overlays}/<frame>` plus `<root>/<tag>/overlay_video.avi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn recording_dir(&self, tag: &str) -> PathBuf {
        self.root.join(tag)
    }

    pub fn asset_dir(&self, tag: &str, kind: AssetKind) -> PathBuf {
        self.recording_dir(tag).join(kind.dir_name())
    }

    pub fn overlay_video(&self, tag: &str) -> PathBuf {
        self.recording_dir(tag).join("overlay_video.avi")
    }

    /// Layout under `<root>/.staging`, where a recording is built before it replaces the stored one.
    pub fn staging(&self) -> MediaLayout {
        MediaLayout::new(self.root.join(STAGING_DIR))
    }

    /// Removes anything stored for `tag` and recreates the empty asset directories.
    pub fn prepare_recording(&self, tag: &str) -> MotionResult<()> {
        self.discard(tag)?;
        for kind in [AssetKind::Picture, AssetKind::Skeleton, AssetKind::Overlay] {
            fs::create_dir_all(self.asset_dir(tag, kind))?;
        }
        Ok(())
    }

    /// Replaces the assets stored for `tag` with the ones built in `staging`.
    pub fn promote(&self, staging: &MediaLayout, tag: &str) -> MotionResult<()> {
        self.discard(tag)?;
        fs::create_dir_all(&self.root)?;
        fs::rename(staging.recording_dir(tag), self.recording_dir(tag))?;
        Ok(())
    }

    /// Removes the assets stored for `tag`, if any.
    pub fn discard(&self, tag: &str) -> MotionResult<()> {
        validate_tag(tag)?;
        let dir = self.recording_dir(tag);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Resolves the image shown for a recording's frame.
pub trait AssetResolver {
    fn resolve_image(&self, tag: &str, frame_number: usize) -> MotionResult<PathBuf>;
}

/// Resolves assets of one kind from a [`MediaLayout`] on disk.
pub struct DirectoryAssets {
    layout: MediaLayout,
    kind: AssetKind,
    naming: Box<dyn FrameNaming>,
}

impl DirectoryAssets {
    pub fn new(layout: MediaLayout, kind: AssetKind, naming: Box<dyn FrameNaming>) -> Self {
        Self { layout, kind, naming }
    }

    pub fn path_for(&self, tag: &str, frame_number: usize) -> PathBuf {
        self.layout
            .asset_dir(tag, self.kind)
            .join(self.naming.file_name(frame_number))
    }
}

impl AssetResolver for DirectoryAssets {
    fn resolve_image(&self, tag: &str, frame_number: usize) -> MotionResult<PathBuf> {
        validate_tag(tag)?;
        let path = self.path_for(tag, frame_number);
        if !path.is_file() {
            return Err(MotionError::AssetNotFound {
                tag: tag.to_string(),
                frame_number,
                path,
            });
        }
        Ok(path)
    }
}
