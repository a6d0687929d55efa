use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::imageops::FilterType;
use tracing::{debug, info};

use crate::error::{MotionError, MotionResult};

/// The two clips rendered for a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPair {
    pub trial: PathBuf,
    pub reference: PathBuf,
}

/// Encodes the trial and reference frame lists into two videos.
pub trait VideoRenderer {
    fn render(&self, trial: &[PathBuf], reference: &[PathBuf], out_dir: &Path) -> MotionResult<RenderedPair>;
}

/// Both lists must be non-empty and of equal length.
pub fn check_pair(trial: &[PathBuf], reference: &[PathBuf]) -> MotionResult<()> {
    if trial.len() != reference.len() {
        return Err(MotionError::MismatchedLength {
            trial: trial.len(),
            reference: reference.len(),
        });
    }
    if trial.is_empty() {
        return Err(MotionError::empty_input("no frames to render"));
    }
    Ok(())
}

/// Pipes decoded frames into ffmpeg as raw RGB and writes an AVI.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    fps: u32,
}

impl FfmpegEncoder {
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    pub fn encode(&self, frames: &[PathBuf], output: &Path) -> MotionResult<()> {
        let first = frames
            .first()
            .ok_or_else(|| MotionError::empty_input("no frames to encode"))?;
        let (width, height) = image::image_dimensions(first)?;

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut child = Command::new("ffmpeg")
            .arg("-y")
            .arg("-nostdin")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-r")
            .arg(self.fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-c:v")
            .arg("mpeg4")
            .arg("-vtag")
            .arg("DIVX")
            .arg("-q:v")
            .arg("5")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MotionError::tool("ffmpeg", format!("failed to spawn: {e}")))?;

        let written = {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| MotionError::tool("ffmpeg", "failed to open stdin"))?;
            write_frames(frames, width, height, &mut stdin)
        };

        let status = child.wait()?;
        let written = written?;
        if !status.success() {
            return Err(MotionError::tool("ffmpeg", format!("encoding {} exited with {status}", output.display())));
        }

        debug!(frames = written, output = %output.display(), "Encoded video");
        Ok(())
    }
}

impl VideoRenderer for FfmpegEncoder {
    fn render(&self, trial: &[PathBuf], reference: &[PathBuf], out_dir: &Path) -> MotionResult<RenderedPair> {
        check_pair(trial, reference)?;

        let pair = RenderedPair {
            trial: out_dir.join("trial.avi"),
            reference: out_dir.join("sample.avi"),
        };
        self.encode(trial, &pair.trial)?;
        self.encode(reference, &pair.reference)?;

        info!(frames = trial.len(), dir = %out_dir.display(), "Rendered comparison clips");
        Ok(pair)
    }
}

/// Writes every frame as packed RGB24, resizing frames that differ from `width`x`height`.
fn write_frames<W: Write>(frames: &[PathBuf], width: u32, height: u32, out: &mut W) -> MotionResult<usize> {
    for path in frames {
        let mut frame = image::open(path)?.to_rgb8();
        if frame.dimensions() != (width, height) {
            frame = image::imageops::resize(&frame, width, height, FilterType::Triangle);
        }
        out.write_all(frame.as_raw())?;
    }
    Ok(frames.len())
}
