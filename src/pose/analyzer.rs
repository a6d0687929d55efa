use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MotionError, MotionResult};
use crate::pose::keypoint::{Keypoint, KeypointFrame};

/// Source of stored keypoint recordings, keyed by sample id or trial tag.
pub trait ReferenceStore {
    /// Frames of the recording ordered by frame number.
    fn get_keypoints(&self, tag: &str) -> MotionResult<Vec<KeypointFrame>>;
}

/// How trial frames are paired with reference frames when the recordings differ in length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// i-th trial frame against i-th reference frame; the longer tail is dropped.
    #[default]
    Truncate,
    /// Trial positions are mapped onto the reference timeline proportionally.
    Resample,
}

impl FromStr for Alignment {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "resample" => Ok(Self::Resample),
            other => Err(MotionError::config(format!("unknown alignment '{other}'"))),
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncate => f.write_str("truncate"),
            Self::Resample => f.write_str("resample"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnalyzerSettings {
    /// Joints below this confidence on either side are left out of the score.
    pub min_confidence: f32,
    /// Frames with fewer usable joints than this are not scored at all.
    pub min_joints: usize,
    pub alignment: Alignment,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            min_joints: 4,
            alignment: Alignment::Truncate,
        }
    }
}

/// Deviation of one trial frame from the reference frame it was aligned with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredFrame {
    pub frame_number: usize,
    pub reference_frame: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Analysis {
    pub scored: Vec<ScoredFrame>,
    /// Aligned pairs dropped because too few joints were confident enough.
    pub excluded_frames: usize,
    /// Low-confidence joints left out of the frames that were scored.
    pub excluded_joints: usize,
}

/// Scores a trial recording against one stored reference sample.
#[derive(Debug, Clone)]
pub struct MovementAnalyzer {
    sample_id: String,
    settings: AnalyzerSettings,
}

impl MovementAnalyzer {
    pub fn new(sample_id: impl Into<String>, settings: AnalyzerSettings) -> Self {
        Self {
            sample_id: sample_id.into(),
            settings,
        }
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Looks up the reference sample and scores `trial` against it.
    ///
    /// An unknown sample is an error even when `trial` is empty.
    pub fn analyze(
        &self,
        store: &dyn ReferenceStore,
        trial: &[KeypointFrame],
    ) -> MotionResult<Analysis> {
        let reference = store.get_keypoints(&self.sample_id)?;
        Ok(self.analyze_against(&reference, trial))
    }

    /// Scores `trial` against already loaded reference frames.
    pub fn analyze_against(&self, reference: &[KeypointFrame], trial: &[KeypointFrame]) -> Analysis {
        let mut analysis = Analysis::default();

        for (t, r) in aligned_pairs(trial.len(), reference.len(), self.settings.alignment) {
            let trial_frame = &trial[t];
            let reference_frame = &reference[r];

            match frame_deviation(&reference_frame.keypoints, &trial_frame.keypoints, &self.settings) {
                Some(deviation) => {
                    analysis.excluded_joints += deviation.excluded_joints;
                    analysis.scored.push(ScoredFrame {
                        frame_number: trial_frame.frame_number,
                        reference_frame: reference_frame.frame_number,
                        score: deviation.score,
                    });
                }
                None => {
                    debug!(
                        frame = trial_frame.frame_number,
                        reference = reference_frame.frame_number,
                        "Frame pair has too few confident joints, skipping"
                    );
                    analysis.excluded_frames += 1;
                }
            }
        }

        analysis
    }
}

/// Positions `(trial, reference)` compared under the given alignment.
pub fn aligned_pairs(trial_len: usize, reference_len: usize, alignment: Alignment) -> Vec<(usize, usize)> {
    if trial_len == 0 || reference_len == 0 {
        return Vec::new();
    }

    match alignment {
        Alignment::Truncate => (0..trial_len.min(reference_len)).map(|i| (i, i)).collect(),
        Alignment::Resample => {
            if trial_len == 1 {
                return vec![(0, 0)];
            }
            let ratio = (reference_len - 1) as f64 / (trial_len - 1) as f64;
            (0..trial_len)
                .map(|i| (i, ((i as f64 * ratio).round() as usize).min(reference_len - 1)))
                .collect()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameDeviation {
    score: f32,
    excluded_joints: usize,
}

/// Mean joint distance between two poses after removing position and body size, in percent of
/// body scale. `None` when the pair has too few confident joints in common.
fn frame_deviation(
    reference: &[Keypoint],
    trial: &[Keypoint],
    settings: &AnalyzerSettings,
) -> Option<FrameDeviation> {
    let joints = reference.len().max(trial.len());
    let shared: Vec<(Keypoint, Keypoint)> = reference
        .iter()
        .zip(trial)
        .filter(|(r, t)| r.is_reliable(settings.min_confidence) && t.is_reliable(settings.min_confidence))
        .map(|(r, t)| (*r, *t))
        .collect();

    if shared.len() < settings.min_joints.max(1) {
        return None;
    }

    let reference_pose = normalize(shared.iter().map(|(r, _)| r))?;
    let trial_pose = normalize(shared.iter().map(|(_, t)| t))?;

    let total: f64 = reference_pose
        .iter()
        .zip(&trial_pose)
        .map(|((rx, ry), (tx, ty))| ((rx - tx).powi(2) + (ry - ty).powi(2)).sqrt())
        .sum();
    let mean = total / shared.len() as f64;

    Some(FrameDeviation {
        score: (mean * 100.0) as f32,
        excluded_joints: joints - shared.len(),
    })
}

/// Centers the points on their centroid and scales them to unit RMS radius.
fn normalize<'a>(points: impl Iterator<Item = &'a Keypoint>) -> Option<Vec<(f64, f64)>> {
    let points: Vec<(f64, f64)> = points.map(|k| (k.x as f64, k.y as f64)).collect();
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;

    let radius = (points
        .iter()
        .map(|(x, y)| (x - cx).powi(2) + (y - cy).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();

    // All joints collapsed onto one point carries no shape to compare.
    if radius < 1e-9 {
        return None;
    }

    Some(
        points
            .into_iter()
            .map(|(x, y)| ((x - cx) / radius, (y - cy) / radius))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MemoryStore(HashMap<String, Vec<KeypointFrame>>);

    impl ReferenceStore for MemoryStore {
        fn get_keypoints(&self, tag: &str) -> MotionResult<Vec<KeypointFrame>> {
            self.0
                .get(tag)
                .cloned()
                .ok_or_else(|| MotionError::sample_not_found(tag))
        }
    }

    fn pose(offset_x: f32, scale: f32, confidence: f32) -> Vec<Keypoint> {
        let base = [
            (0.50, 0.10),
            (0.40, 0.30),
            (0.60, 0.30),
            (0.35, 0.50),
            (0.65, 0.50),
            (0.45, 0.60),
            (0.55, 0.60),
            (0.45, 0.90),
            (0.55, 0.90),
        ];
        base.iter()
            .map(|(x, y)| Keypoint::new(offset_x + x * scale, y * scale, confidence))
            .collect()
    }

    fn recording(frames: &[usize], keypoints: &[Keypoint]) -> Vec<KeypointFrame> {
        frames
            .iter()
            .map(|&n| KeypointFrame::new(n, keypoints.to_vec()))
            .collect()
    }

    #[test]
    fn test_identical_pose_scores_zero() {
        let analyzer = MovementAnalyzer::new("sample", AnalyzerSettings::default());
        let reference = recording(&[0, 1, 2], &pose(0.0, 1.0, 0.9));
        let analysis = analyzer.analyze_against(&reference, &reference);

        assert_eq!(analysis.scored.len(), 3);
        assert!(analysis.scored.iter().all(|s| s.score.abs() < 1e-3));
        assert_eq!(analysis.excluded_frames, 0);
    }

    #[test]
    fn test_position_and_size_do_not_count_as_deviation() {
        let analyzer = MovementAnalyzer::new("sample", AnalyzerSettings::default());
        let reference = recording(&[0], &pose(0.0, 1.0, 0.9));
        let trial = recording(&[0], &pose(0.2, 0.5, 0.9));

        let analysis = analyzer.analyze_against(&reference, &trial);
        assert!(analysis.scored[0].score < 1e-3);
    }

    #[test]
    fn test_moved_joint_raises_score() {
        let analyzer = MovementAnalyzer::new("sample", AnalyzerSettings::default());
        let reference = recording(&[0], &pose(0.0, 1.0, 0.9));
        let mut moved = pose(0.0, 1.0, 0.9);
        moved[1] = Keypoint::new(0.1, 0.05, 0.9);
        let trial = recording(&[0], &moved);

        let analysis = analyzer.analyze_against(&reference, &trial);
        assert!(analysis.scored[0].score > 10.0);
    }

    #[test]
    fn test_low_confidence_joint_is_excluded() {
        let analyzer = MovementAnalyzer::new("sample", AnalyzerSettings::default());
        let reference = recording(&[0], &pose(0.0, 1.0, 0.9));
        let mut noisy = pose(0.0, 1.0, 0.9);
        noisy[1] = Keypoint::new(0.95, 0.95, 0.05);
        let trial = recording(&[0], &noisy);

        let analysis = analyzer.analyze_against(&reference, &trial);
        assert_eq!(analysis.excluded_joints, 1);
        assert!(analysis.scored[0].score < 1e-3);
    }

    #[test]
    fn test_unreliable_frame_is_dropped_and_counted() {
        let analyzer = MovementAnalyzer::new("sample", AnalyzerSettings::default());
        let reference = recording(&[0, 1, 2], &pose(0.0, 1.0, 0.9));
        let mut trial = recording(&[0, 1, 2], &pose(0.0, 1.0, 0.9));
        trial[1].keypoints = pose(0.0, 1.0, 0.1);

        let analysis = analyzer.analyze_against(&reference, &trial);
        assert_eq!(analysis.excluded_frames, 1);
        let numbers: Vec<usize> = analysis.scored.iter().map(|s| s.frame_number).collect();
        assert_eq!(numbers, vec![0, 2]);
    }

    #[test]
    fn test_empty_trial_gives_empty_sequence() -> anyhow::Result<()> {
        let store = MemoryStore(HashMap::from([(
            "sample".to_string(),
            recording(&[0, 1], &pose(0.0, 1.0, 0.9)),
        )]));
        let analyzer = MovementAnalyzer::new("sample", AnalyzerSettings::default());

        let analysis = analyzer.analyze(&store, &[])?;
        assert!(analysis.scored.is_empty());
        assert_eq!(analysis.excluded_frames, 0);
        Ok(())
    }

    #[test]
    fn test_unknown_sample_is_not_found() {
        let store = MemoryStore(HashMap::new());
        let analyzer = MovementAnalyzer::new("missing", AnalyzerSettings::default());

        let err = analyzer.analyze(&store, &[]).unwrap_err();
        assert!(matches!(err, MotionError::SampleNotFound { ref sample_id } if sample_id == "missing"));
    }

    #[test]
    fn test_trial_frame_numbers_are_preserved() {
        let analyzer = MovementAnalyzer::new("sample", AnalyzerSettings::default());
        let reference = recording(&[0, 1, 2, 3], &pose(0.0, 1.0, 0.9));
        let trial = recording(&[5, 7, 9], &pose(0.0, 1.0, 0.9));

        let analysis = analyzer.analyze_against(&reference, &trial);
        let numbers: Vec<usize> = analysis.scored.iter().map(|s| s.frame_number).collect();
        let references: Vec<usize> = analysis.scored.iter().map(|s| s.reference_frame).collect();
        assert_eq!(numbers, vec![5, 7, 9]);
        assert_eq!(references, vec![0, 1, 2]);
    }

    #[test]
    fn test_truncate_alignment_uses_shorter_length() {
        assert_eq!(aligned_pairs(5, 3, Alignment::Truncate), vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!(aligned_pairs(2, 4, Alignment::Truncate), vec![(0, 0), (1, 1)]);
        assert!(aligned_pairs(0, 4, Alignment::Truncate).is_empty());
    }

    #[test]
    fn test_resample_alignment_spans_reference() {
        assert_eq!(
            aligned_pairs(3, 5, Alignment::Resample),
            vec![(0, 0), (1, 2), (2, 4)]
        );
        assert_eq!(
            aligned_pairs(5, 3, Alignment::Resample),
            vec![(0, 0), (1, 1), (2, 1), (3, 2), (4, 2)]
        );
        assert_eq!(aligned_pairs(1, 7, Alignment::Resample), vec![(0, 0)]);
        assert!(aligned_pairs(4, 0, Alignment::Resample).is_empty());
    }

    #[test]
    fn test_alignment_parses_from_config_text() -> anyhow::Result<()> {
        assert_eq!("Resample".parse::<Alignment>()?, Alignment::Resample);
        assert_eq!(" truncate ".parse::<Alignment>()?, Alignment::Truncate);
        assert!("nearest".parse::<Alignment>().is_err());
        Ok(())
    }
}
