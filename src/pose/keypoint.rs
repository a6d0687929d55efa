use serde::{Deserialize, Serialize};

/// Number of joints in the COCO body layout produced by the pose model.
pub const JOINT_COUNT: usize = 17;

/// A detected joint. Coordinates are normalized to [0, 1] of the sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn is_reliable(&self, min_confidence: f32) -> bool {
        self.confidence >= min_confidence && self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f32; 3]> for Keypoint {
    fn from([x, y, confidence]: [f32; 3]) -> Self {
        Self { x, y, confidence }
    }
}

impl From<Keypoint> for [f32; 3] {
    fn from(k: Keypoint) -> Self {
        [k.x, k.y, k.confidence]
    }
}

/// All joints detected on one sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypointFrame {
    pub frame_number: usize,
    pub keypoints: Vec<Keypoint>,
}

impl KeypointFrame {
    pub fn new(frame_number: usize, keypoints: Vec<Keypoint>) -> Self {
        Self {
            frame_number,
            keypoints,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joint {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

/// Bones drawn between joints when rendering a skeleton.
pub const SKELETON_EDGES: [(Joint, Joint); 16] = [
    (Joint::LeftEar, Joint::LeftEye),
    (Joint::LeftEye, Joint::Nose),
    (Joint::Nose, Joint::RightEye),
    (Joint::RightEye, Joint::RightEar),
    (Joint::LeftShoulder, Joint::RightShoulder),
    (Joint::LeftShoulder, Joint::LeftElbow),
    (Joint::LeftElbow, Joint::LeftWrist),
    (Joint::RightShoulder, Joint::RightElbow),
    (Joint::RightElbow, Joint::RightWrist),
    (Joint::LeftShoulder, Joint::LeftHip),
    (Joint::RightShoulder, Joint::RightHip),
    (Joint::LeftHip, Joint::RightHip),
    (Joint::LeftHip, Joint::LeftKnee),
    (Joint::LeftKnee, Joint::LeftAnkle),
    (Joint::RightHip, Joint::RightKnee),
    (Joint::RightKnee, Joint::RightAnkle),
];

impl Joint {
    pub fn index(self) -> usize {
        self as usize
    }
}
