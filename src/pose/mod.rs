pub mod analyzer;
pub mod keypoint;
pub mod window;
