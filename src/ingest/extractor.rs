use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam::channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::database::repo::{KeypointWriter, RecordingInfo, RecordingKind};
use crate::ingest::hasher;
use crate::media::encoder::FfmpegEncoder;
use crate::media::ffmpeg::{self, SampledFrame, SamplerSettings};
use crate::media::layout::{validate_tag, AssetKind, FrameNaming, MediaLayout};
use crate::media::mimetype;
use crate::ml::engine::PoseEstimator;
use crate::ml::skeleton;
use crate::pose::keypoint::KeypointFrame;

#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub video: PathBuf,
    pub tag: String,
    pub kind: RecordingKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSummary {
    pub tag: String,
    pub frames_sampled: usize,
    pub frames_stored: usize,
    pub failed_frames: usize,
    pub overlay_video: Option<PathBuf>,
}

/// Samples a video, estimates poses, and stores keypoints plus per-frame images.
pub struct Extractor {
    estimator: Box<dyn PoseEstimator>,
    layout: MediaLayout,
    naming: Box<dyn FrameNaming>,
    sampler: SamplerSettings,
    db_path: PathBuf,
    workers: usize,
    min_confidence: f32,
    overlay_encoder: Option<FfmpegEncoder>,
    show_progress: bool,
}

impl Extractor {
    pub fn new(
        estimator: Box<dyn PoseEstimator>,
        layout: MediaLayout,
        naming: Box<dyn FrameNaming>,
        sampler: SamplerSettings,
        db_path: PathBuf,
    ) -> Self {
        Self {
            estimator,
            layout,
            naming,
            sampler,
            db_path,
            workers: 2,
            min_confidence: 0.3,
            overlay_encoder: None,
            show_progress: false,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Encode the overlays of every extracted recording into one video at `fps`.
    pub fn with_overlay_video(mut self, fps: u32) -> Self {
        self.overlay_encoder = Some(FfmpegEncoder::new(fps));
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn run(&self, job: &ExtractionJob) -> Result<ExtractionSummary> {
        validate_tag(&job.tag)?;
        let mime = mimetype::ensure_video(&job.video)?;
        let digest = hasher::hash_video(&job.video)?;
        info!(tag = %job.tag, kind = %job.kind, mime = %mime, video = ?job.video, "Extracting recording");

        let recording = RecordingInfo {
            tag: job.tag.clone(),
            kind: job.kind,
            source_path: job.video.to_string_lossy().to_string(),
            source_sha256: digest.sha256,
            interval_secs: self.sampler.interval_secs,
            frame_count: 0,
        };

        let video = job.video.as_path();
        let sampler = &self.sampler;
        self.extract_frames(&recording, move |deliver| {
            ffmpeg::sample_frames(video, sampler, |frame| deliver(frame))
        })
    }

    /// Runs the sampler → pose workers → database writer stages for one recording.
    ///
    /// `source` pushes frames into the delivery callback and returns how many it produced;
    /// the callback returns `false` once the pipeline can take no more frames.
    /// Images are built under the staging layout and keypoints in an open transaction, so
    /// a failed run leaves any previous recording with the same tag untouched.
    pub fn extract_frames<S>(&self, recording: &RecordingInfo, source: S) -> Result<ExtractionSummary>
    where
        S: FnOnce(&mut dyn FnMut(SampledFrame) -> bool) -> Result<usize> + Send,
    {
        let tag = recording.tag.as_str();
        validate_tag(tag)?;

        let staging = self.layout.staging();
        staging
            .prepare_recording(tag)
            .with_context(|| format!("Failed to prepare media directory for {}", tag))?;

        let staged = self.stage_recording(&staging, recording, source);
        let (frames_sampled, frames_stored, failed_frames, stored) = match staged {
            Ok(counts) => counts,
            Err(e) => {
                if let Err(cleanup) = staging.discard(tag) {
                    warn!(tag, "Failed to remove staged media: {}", cleanup);
                }
                return Err(e);
            }
        };

        self.layout
            .promote(&staging, tag)
            .with_context(|| format!("Failed to move staged media for {} into place", tag))?;

        if failed_frames > 0 {
            warn!(tag, failed_frames, "Some frames could not be processed");
        }

        let overlay_video = match &self.overlay_encoder {
            Some(encoder) if !stored.is_empty() => self.encode_overlays(encoder, tag, &stored),
            _ => None,
        };

        info!(tag, frames_sampled, frames_stored, "Extraction finished");
        Ok(ExtractionSummary {
            tag: tag.to_string(),
            frames_sampled,
            frames_stored,
            failed_frames,
            overlay_video,
        })
    }

    /// Returns `(frames_sampled, frames_stored, failed_frames, stored frame numbers)`.
    fn stage_recording<S>(
        &self,
        staging: &MediaLayout,
        recording: &RecordingInfo,
        source: S,
    ) -> Result<(usize, usize, usize, Vec<usize>)>
    where
        S: FnOnce(&mut dyn FnMut(SampledFrame) -> bool) -> Result<usize> + Send,
    {
        let tag = recording.tag.as_str();
        let mut writer = KeypointWriter::begin(&self.db_path, recording)?;

        let progress = self.progress_bar(tag)?;
        let failed = AtomicUsize::new(0);
        let mut stored = Vec::new();

        let (frame_tx, frame_rx) = bounded::<SampledFrame>(self.workers * 2);
        let (keypoint_tx, keypoint_rx) = bounded::<KeypointFrame>(64);

        let frames_sampled = thread::scope(|s| -> Result<usize> {
            let sampler = s.spawn(move || {
                let mut deliver = |frame: SampledFrame| frame_tx.send(frame).is_ok();
                source(&mut deliver)
            });

            for worker in 0..self.workers {
                let rx = frame_rx.clone();
                let tx = keypoint_tx.clone();
                let failed = &failed;
                s.spawn(move || {
                    for frame in rx {
                        let frame_number = frame.frame_number;
                        match self.process_frame(staging, tag, frame) {
                            Ok(keypoints) => {
                                if tx.send(keypoints).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                error!(worker, frame = frame_number, "Pose extraction failed: {:#}", e);
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                });
            }
            // Drop the originals so the channels close when the stages finish.
            drop(frame_rx);
            drop(keypoint_tx);

            // Owned here so an early return disconnects the workers instead of blocking them.
            let keypoint_rx = keypoint_rx;
            for frame in &keypoint_rx {
                stored.push(frame.frame_number);
                writer.add(frame)?;
                progress.inc(1);
            }

            sampler
                .join()
                .map_err(|_| anyhow!("Frame sampler thread panicked"))?
        });
        progress.finish_and_clear();

        let frames_sampled = frames_sampled?;
        let frames_stored = writer.finish()?;
        stored.sort_unstable();
        Ok((frames_sampled, frames_stored, failed.into_inner(), stored))
    }

    fn process_frame(&self, staging: &MediaLayout, tag: &str, frame: SampledFrame) -> Result<KeypointFrame> {
        let keypoints = self.estimator.estimate(&frame.image)?;

        let name = self.naming.file_name(frame.frame_number);
        let (width, height) = frame.image.dimensions();
        let skeleton = skeleton::render_skeleton(width, height, &keypoints, self.min_confidence);
        let overlay = skeleton::render_overlay(&frame.image, &keypoints, self.min_confidence);

        save(&frame.image, &staging.asset_dir(tag, AssetKind::Picture).join(&name))?;
        save(&skeleton, &staging.asset_dir(tag, AssetKind::Skeleton).join(&name))?;
        save(&overlay, &staging.asset_dir(tag, AssetKind::Overlay).join(&name))?;

        Ok(KeypointFrame::new(frame.frame_number, keypoints))
    }

    fn encode_overlays(&self, encoder: &FfmpegEncoder, tag: &str, frames: &[usize]) -> Option<PathBuf> {
        let overlay_dir = self.layout.asset_dir(tag, AssetKind::Overlay);
        let overlays: Vec<PathBuf> = frames
            .iter()
            .map(|&n| overlay_dir.join(self.naming.file_name(n)))
            .collect();
        let output = self.layout.overlay_video(tag);

        match encoder.encode(&overlays, &output) {
            Ok(()) => Some(output),
            Err(e) => {
                warn!(tag, "Overlay video not written: {}", e);
                None
            }
        }
    }

    fn progress_bar(&self, tag: &str) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}] {pos} frames")?);
        bar.set_message(format!("extracting {}", tag));
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Ok(bar)
    }
}

fn save(image: &image::RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("Failed to write {:?}", path))
}
