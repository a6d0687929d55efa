use serde::Serialize;

use crate::pose::analyzer::ScoredFrame;

/// Inclusive index range into a scored sequence. Never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameWindow {
    start: usize,
    end: usize,
}

impl FrameWindow {
    /// Window of `radius` frames on each side of `center`, clipped to a sequence of `len` frames.
    ///
    /// Returns `None` when `len == 0` or `center` lies outside the sequence.
    pub fn around(center: usize, radius: usize, len: usize) -> Option<Self> {
        if center >= len {
            return None;
        }
        Some(Self {
            start: center.saturating_sub(radius),
            end: center.saturating_add(radius).min(len - 1),
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }
}

/// Result of searching a scored sequence for the first significant deviation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Selection {
    /// Nothing was scored.
    Empty,
    /// Every frame stayed within the threshold.
    NoDeviation,
    Deviation {
        index_of_failure: usize,
        window: FrameWindow,
        /// Trial frame numbers covered by the window, in order.
        frame_numbers: Vec<usize>,
    },
}

impl Selection {
    pub fn window(&self) -> Option<FrameWindow> {
        match self {
            Self::Deviation { window, .. } => Some(*window),
            _ => None,
        }
    }
}

/// Index of the first frame whose score strictly exceeds `threshold`.
pub fn find_failure(scored: &[ScoredFrame], threshold: f32) -> Option<usize> {
    scored.iter().position(|frame| frame.score > threshold)
}

pub fn select_window(scored: &[ScoredFrame], threshold: f32, radius: usize) -> Selection {
    if scored.is_empty() {
        return Selection::Empty;
    }

    let Some(index_of_failure) = find_failure(scored, threshold) else {
        return Selection::NoDeviation;
    };

    match FrameWindow::around(index_of_failure, radius, scored.len()) {
        Some(window) => Selection::Deviation {
            index_of_failure,
            window,
            frame_numbers: scored[window.start..=window.end]
                .iter()
                .map(|frame| frame.frame_number)
                .collect(),
        },
        None => Selection::NoDeviation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sequence(scores: &[f32]) -> Vec<ScoredFrame> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| ScoredFrame {
                frame_number: i,
                reference_frame: i,
                score,
            })
            .collect()
    }

    #[test]
    fn test_window_centered_on_first_failure() {
        let mut scores = vec![0.0; 100];
        scores[40] = 15.0;

        let selection = select_window(&sequence(&scores), 10.0, 2);
        let Selection::Deviation { index_of_failure, window, frame_numbers } = selection else {
            panic!("expected a deviation");
        };
        assert_eq!(index_of_failure, 40);
        assert_eq!((window.start(), window.end()), (38, 42));
        assert_eq!(frame_numbers, vec![38, 39, 40, 41, 42]);
    }

    #[test]
    fn test_scores_within_threshold_report_no_deviation() {
        let selection = select_window(&sequence(&[1.0, 9.5, 10.0, 3.0]), 10.0, 2);
        assert_eq!(selection, Selection::NoDeviation);
    }

    #[test]
    fn test_deviation_at_frame_zero_is_distinct_from_no_deviation() {
        let selection = select_window(&sequence(&[11.0, 0.0, 0.0, 0.0]), 10.0, 1);
        assert_eq!(selection.window(), FrameWindow::around(0, 1, 4));
        assert!(matches!(selection, Selection::Deviation { index_of_failure: 0, .. }));
    }

    #[test]
    fn test_window_clips_to_short_sequence() {
        let selection = select_window(&sequence(&[0.0, 20.0, 0.0]), 10.0, 5);
        let window = selection.window().expect("deviation window");
        assert_eq!((window.start(), window.end()), (0, 2));
    }

    #[test]
    fn test_empty_sequence_is_sentinel() {
        assert_eq!(select_window(&[], 10.0, 2), Selection::Empty);
    }

    #[test]
    fn test_frame_numbers_follow_trial_numbering() {
        let scored: Vec<ScoredFrame> = [(3, 0.0), (6, 0.0), (9, 12.0), (12, 0.0)]
            .iter()
            .map(|&(frame_number, score)| ScoredFrame {
                frame_number,
                reference_frame: 0,
                score,
            })
            .collect();

        let Selection::Deviation { frame_numbers, .. } = select_window(&scored, 10.0, 1) else {
            panic!("expected a deviation");
        };
        assert_eq!(frame_numbers, vec![6, 9, 12]);
    }

    #[test]
    fn test_window_serializes_with_outcome_tag() -> anyhow::Result<()> {
        let json = serde_json::to_value(select_window(&sequence(&[0.0, 12.0]), 10.0, 0))?;
        assert_eq!(json["outcome"], "deviation");
        assert_eq!(json["window"]["start"], 1);
        assert_eq!(json["frame_numbers"], serde_json::json!([1]));
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_window_stays_in_bounds(
            scores in prop::collection::vec(0.0f32..30.0, 1..200),
            threshold in 0.0f32..30.0,
            radius in 0usize..50,
        ) {
            let scored = sequence(&scores);
            if let Selection::Deviation { index_of_failure, window, frame_numbers } =
                select_window(&scored, threshold, radius)
            {
                prop_assert!(window.start() <= index_of_failure);
                prop_assert!(index_of_failure <= window.end());
                prop_assert!(window.end() < scored.len());
                prop_assert!(window.len() <= 2 * radius + 1);
                prop_assert_eq!(frame_numbers.len(), window.len());

                let clipped = index_of_failure < radius || index_of_failure + radius >= scored.len();
                if !clipped {
                    prop_assert_eq!(window.len(), 2 * radius + 1);
                }
            }
        }

        #[test]
        fn prop_no_score_above_threshold_means_no_deviation(
            scores in prop::collection::vec(0.0f32..10.0, 1..200),
            radius in 0usize..10,
        ) {
            prop_assert_eq!(select_window(&sequence(&scores), 10.0, radius), Selection::NoDeviation);
        }

        #[test]
        fn prop_failure_is_first_exceeding_index(
            scores in prop::collection::vec(0.0f32..30.0, 1..100),
            threshold in 0.0f32..30.0,
        ) {
            let scored = sequence(&scores);
            match find_failure(&scored, threshold) {
                Some(i) => {
                    prop_assert!(scores[i] > threshold);
                    prop_assert!(scores[..i].iter().all(|&s| s <= threshold));
                }
                None => prop_assert!(scores.iter().all(|&s| s <= threshold)),
            }
        }
    }
}
