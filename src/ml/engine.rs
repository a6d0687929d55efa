use std::path::Path;

use anyhow::{Result, Context, anyhow};
use image::{DynamicImage, RgbImage};
use ort::session::Session;
use ort::value::Tensor;

use crate::ml::pipeline;
use crate::pose::keypoint::Keypoint;

/// Detects body keypoints on a still frame.
pub trait PoseEstimator: Send + Sync {
    fn estimate(&self, frame: &RgbImage) -> Result<Vec<Keypoint>>;
}

pub struct InferenceEngine {
    session: Session,
    input_name: String,
    output_name: String,
    input_size: u32,
}

impl InferenceEngine {
    pub fn new(model_path: &Path, input_size: u32, threads: usize) -> Result<Self> {
        // The global environment is process-wide; a second commit is a no-op we can ignore.
        let _ = ort::init()
            .with_name("motion-diff-pose")
            .commit();

        let session = Session::builder()?
            .with_intra_threads(threads.max(1))?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load pose model {:?}", model_path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| anyhow!("Pose model declares no inputs"))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| anyhow!("Pose model declares no outputs"))?;

        Ok(Self {
            session,
            input_name,
            output_name,
            input_size,
        })
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}

impl PoseEstimator for InferenceEngine {
    fn estimate(&self, frame: &RgbImage) -> Result<Vec<Keypoint>> {
        let image = DynamicImage::ImageRgb8(frame.clone());
        let input = pipeline::normalize_for_pose(&image, self.input_size)?;
        let tensor = Tensor::from_array(input).context("Failed to build input tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor]?)
            .context("Pose inference failed")?;
        let output = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .context("Failed to extract pose output")?;

        pipeline::decode_keypoints(output)
    }
}
