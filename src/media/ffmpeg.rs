use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tracing::{debug, warn};

/// How often and at which size frames are pulled out of a video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub interval_secs: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 0.5,
            width: 640,
            height: 480,
        }
    }
}

impl SamplerSettings {
    fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// One frame per interval, scaled to fit and padded to the target size.
    pub fn filter_graph(&self) -> String {
        format!(
            "fps=1/{interval},scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            interval = self.interval_secs,
            w = self.width,
            h = self.height,
        )
    }
}

#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub frame_number: usize,
    pub image: RgbImage,
}

pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Streams frames of `input_path` to `on_frame` as ffmpeg decodes them.
///
/// Frames are numbered from 0 in sampling order. Returning `false` from `on_frame` stops
/// sampling early. Returns the number of frames delivered.
pub fn sample_frames<F>(input_path: &Path, settings: &SamplerSettings, mut on_frame: F) -> Result<usize>
where
    F: FnMut(SampledFrame) -> bool,
{
    // -i input -vf fps=...,scale=...,pad=... -f rawvideo -pix_fmt rgb24 -
    let mut child = Command::new("ffmpeg")
        .arg("-nostdin")
        .arg("-i")
        .arg(input_path)
        .arg("-vf")
        .arg(settings.filter_graph())
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn ffmpeg command")?;

    let Some(mut stdout) = child.stdout.take() else {
        stop(&mut child);
        return Err(anyhow!("Failed to open stdout"));
    };

    match stream_frames(&mut stdout, settings, &mut on_frame) {
        Ok(Streamed::Finished(delivered)) => {
            let status = child.wait().context("Failed to wait on ffmpeg")?;
            if !status.success() {
                return Err(anyhow!("ffmpeg exited with non-zero status"));
            }
            Ok(delivered)
        }
        Ok(Streamed::Stopped(delivered)) => {
            debug!(delivered, "Frame consumer stopped, terminating ffmpeg");
            stop(&mut child);
            Ok(delivered)
        }
        Err(e) => {
            stop(&mut child);
            Err(e)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Streamed {
    /// The stream ended; carries the number of frames delivered.
    Finished(usize),
    /// The consumer asked to stop after this many frames.
    Stopped(usize),
}

/// Cuts `reader` into frames of `settings` size and hands them to `on_frame`.
fn stream_frames<R, F>(reader: &mut R, settings: &SamplerSettings, on_frame: &mut F) -> Result<Streamed>
where
    R: Read,
    F: FnMut(SampledFrame) -> bool,
{
    let mut buffer = vec![0u8; settings.frame_bytes()];
    let mut delivered = 0;

    loop {
        let filled = read_full(reader, &mut buffer).context("Failed to read ffmpeg output")?;
        if filled < buffer.len() {
            if filled > 0 {
                warn!(bytes = filled, "Discarding truncated trailing frame");
            }
            return Ok(Streamed::Finished(delivered));
        }

        let image = RgbImage::from_raw(settings.width, settings.height, buffer.clone())
            .ok_or_else(|| anyhow!("Frame buffer does not match {}x{}", settings.width, settings.height))?;

        let keep_going = on_frame(SampledFrame {
            frame_number: delivered,
            image,
        });
        delivered += 1;

        if !keep_going {
            return Ok(Streamed::Stopped(delivered));
        }
    }
}

/// Kills a child that is no longer read from and reaps it.
fn stop(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("ffmpeg already exited: {}", e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to wait on ffmpeg: {}", e);
    }
}

/// Reads until `buf` is full or the stream ends; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
