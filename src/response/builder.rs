use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::archive::tarball::Archiver;
use crate::error::{MotionError, MotionResult};
use crate::media::encoder::{check_pair, VideoRenderer};
use crate::media::layout::{validate_tag, AssetResolver};
use crate::pose::analyzer::{Alignment, Analysis, MovementAnalyzer, ReferenceStore, ScoredFrame};
use crate::pose::window::{select_window, Selection};

/// Threshold and window radius used to pick frames for the visual diff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelectionSettings {
    pub threshold: f32,
    pub frame_radius: usize,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            threshold: 10.0,
            frame_radius: 2,
        }
    }
}

/// Everything known about one comparison, written as `report.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub sample_id: String,
    pub trial_tag: String,
    pub threshold: f32,
    pub frame_radius: usize,
    pub alignment: Alignment,
    pub min_confidence: f32,
    pub excluded_frames: usize,
    pub excluded_joints: usize,
    pub scored: Vec<ScoredFrame>,
    pub selection: Selection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOutcome {
    pub report: ComparisonReport,
    pub report_path: PathBuf,
    /// Present only when a deviation was found and rendered.
    pub archive: Option<PathBuf>,
}

impl ComparisonOutcome {
    pub fn has_deviation(&self) -> bool {
        matches!(self.report.selection, Selection::Deviation { .. })
    }
}

/// Runs analysis and window selection for a trial, then renders and archives the diff.
pub struct ResponseBuilder<'a> {
    analyzer: MovementAnalyzer,
    selection: SelectionSettings,
    assets: &'a dyn AssetResolver,
    renderer: &'a dyn VideoRenderer,
    archiver: &'a dyn Archiver,
    result_dir: PathBuf,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(
        analyzer: MovementAnalyzer,
        selection: SelectionSettings,
        assets: &'a dyn AssetResolver,
        renderer: &'a dyn VideoRenderer,
        archiver: &'a dyn Archiver,
        result_dir: impl Into<PathBuf>,
    ) -> MotionResult<Self> {
        if !selection.threshold.is_finite() || selection.threshold < 0.0 {
            return Err(MotionError::config(format!(
                "threshold must be a non-negative number, got {}",
                selection.threshold
            )));
        }
        Ok(Self {
            analyzer,
            selection,
            assets,
            renderer,
            archiver,
            result_dir: result_dir.into(),
        })
    }

    pub fn analyzer(&self) -> &MovementAnalyzer {
        &self.analyzer
    }

    /// Compares the stored trial `trial_tag` against the analyzer's sample.
    pub fn build(&self, store: &dyn ReferenceStore, trial_tag: &str) -> MotionResult<ComparisonOutcome> {
        let trial = store.get_keypoints(trial_tag).map_err(|e| match e {
            MotionError::SampleNotFound { sample_id } => MotionError::TrialNotFound { tag: sample_id },
            other => other,
        })?;
        let analysis = self.analyzer.analyze(store, &trial)?;
        self.respond(trial_tag, analysis)
    }

    /// Selects the window for an analysis that has already been computed and produces the result.
    pub fn respond(&self, trial_tag: &str, analysis: Analysis) -> MotionResult<ComparisonOutcome> {
        validate_tag(trial_tag)?;
        let sample_id = self.analyzer.sample_id();
        let selection = select_window(
            &analysis.scored,
            self.selection.threshold,
            self.selection.frame_radius,
        );

        // Outputs of an earlier comparison of this trial would contradict the new report.
        let out_dir = self.result_dir.join(trial_tag);
        if out_dir.exists() {
            fs::remove_dir_all(&out_dir)?;
        }
        fs::create_dir_all(&out_dir)?;

        // Resolve every asset before anything is rendered so a missing frame fails fast.
        let images = match &selection {
            Selection::Deviation { index_of_failure, window, .. } => {
                info!(
                    sample = sample_id,
                    trial = trial_tag,
                    index_of_failure,
                    start = window.start(),
                    end = window.end(),
                    "Deviation found"
                );
                Some(self.resolve_window(trial_tag, &analysis.scored[window.start()..=window.end()])?)
            }
            Selection::NoDeviation => {
                info!(sample = sample_id, trial = trial_tag, "Trial matches sample within threshold");
                None
            }
            Selection::Empty => {
                info!(sample = sample_id, trial = trial_tag, "No scorable frames in trial");
                None
            }
        };

        let settings = self.analyzer.settings();
        let report = ComparisonReport {
            sample_id: sample_id.to_string(),
            trial_tag: trial_tag.to_string(),
            threshold: self.selection.threshold,
            frame_radius: self.selection.frame_radius,
            alignment: settings.alignment,
            min_confidence: settings.min_confidence,
            excluded_frames: analysis.excluded_frames,
            excluded_joints: analysis.excluded_joints,
            scored: analysis.scored,
            selection,
        };
        let report_path = out_dir.join("report.json");
        write_report(&report, &report_path)?;

        let archive = match images {
            Some((trial_images, reference_images)) => {
                check_pair(&trial_images, &reference_images)?;
                let clips = self.renderer.render(&trial_images, &reference_images, &out_dir)?;
                Some(self.archiver.archive(
                    &[clips.trial, clips.reference, report_path.clone()],
                    &out_dir.join("result.tar.gz"),
                )?)
            }
            None => None,
        };

        Ok(ComparisonOutcome {
            report,
            report_path,
            archive,
        })
    }

    fn resolve_window(&self, trial_tag: &str, frames: &[ScoredFrame]) -> MotionResult<(Vec<PathBuf>, Vec<PathBuf>)> {
        let sample_id = self.analyzer.sample_id();
        let mut trial_images = Vec::with_capacity(frames.len());
        let mut reference_images = Vec::with_capacity(frames.len());

        for frame in frames {
            trial_images.push(self.assets.resolve_image(trial_tag, frame.frame_number)?);
            reference_images.push(self.assets.resolve_image(sample_id, frame.reference_frame)?);
        }
        Ok((trial_images, reference_images))
    }
}

fn write_report(report: &ComparisonReport, path: &Path) -> MotionResult<()> {
    fs::write(path, serde_json::to_vec_pretty(report)?)?;
    Ok(())
}
