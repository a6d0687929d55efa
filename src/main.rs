mod archive;
mod database;
mod error;
mod ingest;
mod media;
mod ml;
mod pose;
mod response;
mod utils;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::archive::tarball::TarGzArchiver;
use crate::database::repo::{RecordingKind, SqliteStore};
use crate::error::MotionError;
use crate::ingest::extractor::{ExtractionJob, Extractor};
use crate::ingest::{hasher, scanner};
use crate::media::encoder::FfmpegEncoder;
use crate::media::ffmpeg;
use crate::media::layout::{DirectoryAssets, MediaLayout, NumberedFrames};
use crate::ml::engine::InferenceEngine;
use crate::pose::analyzer::{Alignment, Analysis, MovementAnalyzer, ReferenceStore};
use crate::response::builder::{ComparisonOutcome, ResponseBuilder, SelectionSettings};
use crate::utils::config::PipelineConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Compare a trial performance against a reference sample", long_about = None)]
struct Args {
    /// KEY=VALUE configuration file
    #[arg(short, long, default_value = ".env")]
    config: PathBuf,

    #[arg(short, long)]
    db_path: Option<PathBuf>,

    #[arg(short, long)]
    media_dir: Option<PathBuf>,

    #[arg(short, long)]
    result_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample a video, estimate poses, and store the keypoints under a tag
    Extract {
        #[arg(short, long)]
        video: PathBuf,

        /// Tag to store the recording under (defaults to the video's content hash)
        #[arg(short, long)]
        tag: Option<String>,

        #[arg(short, long, value_enum, default_value_t = KindArg::Sample)]
        kind: KindArg,

        #[command(flatten)]
        extraction: ExtractionArgs,
    },

    /// Compare a trial against a stored sample and build the result archive
    Compare {
        #[arg(short, long)]
        sample: String,

        /// Tag of an already extracted trial, or the tag to store `--video` under
        #[arg(short, long, required_unless_present = "video")]
        trial_tag: Option<String>,

        /// Trial video to extract before comparing
        #[arg(short, long)]
        video: Option<PathBuf>,

        #[command(flatten)]
        extraction: ExtractionArgs,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Extract every video in a directory and compare each against a sample
    Batch {
        #[arg(short, long)]
        sample: String,

        #[arg(short, long)]
        input_dir: PathBuf,

        #[command(flatten)]
        extraction: ExtractionArgs,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// List stored recordings
    List,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Sample,
    Trial,
}

impl From<KindArg> for RecordingKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Sample => RecordingKind::Sample,
            KindArg::Trial => RecordingKind::Trial,
        }
    }
}

#[derive(clap::Args, Debug)]
struct ExtractionArgs {
    /// Seconds between sampled frames
    #[arg(long)]
    interval: Option<f64>,

    /// Pose model (ONNX)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Pose worker threads
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct SelectionArgs {
    /// Deviation score a frame must exceed to count as a failure
    #[arg(long)]
    threshold: Option<f32>,

    /// Frames shown before and after the first failure
    #[arg(long)]
    radius: Option<usize>,

    #[arg(long)]
    alignment: Option<Alignment>,

    #[arg(long)]
    min_confidence: Option<f32>,
}

impl ExtractionArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(interval) = self.interval {
            config.sampler.interval_secs = interval;
        }
        if let Some(model) = &self.model {
            config.model_path = Some(model.clone());
        }
        if let Some(workers) = self.workers {
            config.pose_workers = workers;
        }
    }
}

impl SelectionArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(radius) = self.radius {
            config.frame_radius = radius;
        }
        if let Some(alignment) = self.alignment {
            config.analyzer.alignment = alignment;
        }
        if let Some(min_confidence) = self.min_confidence {
            config.analyzer.min_confidence = min_confidence;
        }
    }
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt().with_env_filter(env_filter).json().init();
    } else {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let mut config = PipelineConfig::load(&args.config)?;
    if let Some(db_path) = &args.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(media_dir) = &args.media_dir {
        config.media_dir = media_dir.clone();
    }
    if let Some(result_dir) = &args.result_dir {
        config.result_dir = result_dir.clone();
    }

    match &args.command {
        Command::Extract { video, tag, kind, extraction } => {
            extraction.apply(&mut config);
            config.validate()?;

            let extractor = build_extractor(&mut config, &args.config)?;
            let tag = match tag {
                Some(tag) => tag.clone(),
                None => hasher::hash_video(video)?.tag().to_string(),
            };
            let summary = extractor.run(&ExtractionJob {
                video: video.clone(),
                tag,
                kind: (*kind).into(),
            })?;
            println!("{} {} frames", summary.tag, summary.frames_stored);
        }
        Command::Compare { sample, trial_tag, video, extraction, selection } => {
            extraction.apply(&mut config);
            selection.apply(&mut config);
            config.validate()?;

            ensure_sample(&config, sample)?;
            let trial_tag = match video {
                Some(video) => {
                    let tag = match trial_tag {
                        Some(tag) => tag.clone(),
                        None => hasher::hash_video(video)?.tag().to_string(),
                    };
                    let extractor = build_extractor(&mut config, &args.config)?;
                    extractor.run(&ExtractionJob {
                        video: video.clone(),
                        tag: tag.clone(),
                        kind: RecordingKind::Trial,
                    })?;
                    tag
                }
                None => trial_tag.clone().context("--trial-tag or --video is required")?,
            };

            let outcome = compare(&config, sample, &trial_tag)?;
            print_outcome(&outcome);
        }
        Command::Batch { sample, input_dir, extraction, selection } => {
            extraction.apply(&mut config);
            selection.apply(&mut config);
            config.validate()?;

            ensure_sample(&config, sample)?;
            run_batch(&mut config, &args.config, sample, input_dir)?;
        }
        Command::List => {
            let store = SqliteStore::open(&config.db_path)?;
            for recording in store.list_recordings()? {
                println!(
                    "{}\t{}\t{} frames\t{}",
                    recording.tag, recording.kind, recording.frame_count, recording.source_path
                );
            }
        }
    }

    Ok(())
}

fn ensure_sample(config: &PipelineConfig, sample: &str) -> Result<()> {
    let store = SqliteStore::open(&config.db_path)?;
    if store.recording(sample)?.is_none() {
        return Err(MotionError::sample_not_found(sample).into());
    }
    Ok(())
}

fn build_extractor(config: &mut PipelineConfig, config_path: &Path) -> Result<Extractor> {
    if !ffmpeg::ffmpeg_available() {
        bail!("ffmpeg was not found in PATH");
    }

    let model_path = config.resolve_model_path(config_path)?;
    let engine = InferenceEngine::new(&model_path, config.model_input_size, 1)
        .context("Failed to initialize pose engine (check the model path)")?;
    info!("Pose model {:?} ({}px input)", model_path, engine.input_size());

    Ok(Extractor::new(
        Box::new(engine),
        MediaLayout::new(&config.media_dir),
        Box::new(NumberedFrames::default()),
        config.sampler,
        config.db_path.clone(),
    )
    .with_workers(config.pose_workers)
    .with_min_confidence(config.analyzer.min_confidence)
    .with_overlay_video(config.overlay_fps)
    .with_progress(true))
}

/// Collaborators shared by every comparison of a run.
struct Collaborators {
    assets: DirectoryAssets,
    renderer: FfmpegEncoder,
    archiver: TarGzArchiver,
}

impl Collaborators {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            assets: DirectoryAssets::new(
                MediaLayout::new(&config.media_dir),
                config.asset_kind,
                Box::new(NumberedFrames::default()),
            ),
            renderer: FfmpegEncoder::new(config.clip_fps),
            archiver: config
                .compression_level
                .map(TarGzArchiver::with_level)
                .unwrap_or_default(),
        }
    }

    fn builder(&self, config: &PipelineConfig, sample: &str) -> Result<ResponseBuilder<'_>> {
        Ok(ResponseBuilder::new(
            MovementAnalyzer::new(sample, config.analyzer),
            SelectionSettings {
                threshold: config.threshold,
                frame_radius: config.frame_radius,
            },
            &self.assets,
            &self.renderer,
            &self.archiver,
            &config.result_dir,
        )?)
    }
}

fn compare(config: &PipelineConfig, sample: &str, trial_tag: &str) -> Result<ComparisonOutcome> {
    let store = SqliteStore::open(&config.db_path)?;
    let collaborators = Collaborators::new(config);
    let builder = collaborators.builder(config, sample)?;

    let outcome = builder
        .build(&store, trial_tag)
        .with_context(|| format!("Comparison of {} against {} failed", trial_tag, sample))?;
    Ok(outcome)
}

fn run_batch(config: &mut PipelineConfig, config_path: &Path, sample: &str, input_dir: &Path) -> Result<()> {
    let videos = scanner::scan_videos(input_dir)?;
    info!("Found {} trial videos in {:?}", videos.len(), input_dir);
    if videos.is_empty() {
        return Ok(());
    }

    let extractor = build_extractor(config, config_path)?;
    let mut tags = Vec::new();
    for video in &videos {
        let tag = hasher::hash_video(video)?.tag().to_string();
        let job = ExtractionJob {
            video: video.clone(),
            tag: tag.clone(),
            kind: RecordingKind::Trial,
        };
        match extractor.run(&job) {
            Ok(_) => tags.push(tag),
            Err(e) => error!("Extraction of {:?} failed: {:#}", video, e),
        }
    }

    let store = SqliteStore::open(&config.db_path)?;
    let reference = store.get_keypoints(sample)?;
    let mut trials = Vec::with_capacity(tags.len());
    for tag in tags {
        let frames = store.get_keypoints(&tag)?;
        trials.push((tag, frames));
    }

    let collaborators = Collaborators::new(config);
    let builder = collaborators.builder(config, sample)?;
    let analyzer = builder.analyzer();

    // Scoring is pure, so all trials are analyzed at once; rendering stays sequential.
    let analyses: Vec<(String, Analysis)> = trials
        .par_iter()
        .map(|(tag, frames)| (tag.clone(), analyzer.analyze_against(&reference, frames)))
        .collect();

    for (tag, analysis) in analyses {
        match builder.respond(&tag, analysis) {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) if e.is_not_found() => warn!(trial = %tag, "Skipped, re-extract to restore missing media: {}", e),
            Err(e) => warn!(trial = %tag, "Comparison failed: {}", e),
        }
    }
    Ok(())
}

fn print_outcome(outcome: &ComparisonOutcome) {
    let report = &outcome.report;
    if report.excluded_frames > 0 {
        info!(
            trial = %report.trial_tag,
            excluded_frames = report.excluded_frames,
            "Frames skipped for low keypoint confidence"
        );
    }
    match &outcome.archive {
        Some(archive) if outcome.has_deviation() => {
            println!("{}\tdeviation\t{}", report.trial_tag, archive.display())
        }
        _ if report.scored.is_empty() => println!("{}\tno-data\t{}", report.trial_tag, outcome.report_path.display()),
        _ => println!("{}\tmatch\t{}", report.trial_tag, outcome.report_path.display()),
    }
}
