use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

use crate::pose::keypoint::{Keypoint, SKELETON_EDGES};

const JOINT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BONE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const JOINT_RADIUS: i32 = 4;

/// Skeleton of the confident keypoints on a black canvas of the frame's size.
pub fn render_skeleton(width: u32, height: u32, keypoints: &[Keypoint], min_confidence: f32) -> RgbImage {
    let mut canvas = RgbImage::new(width, height);
    draw_skeleton(&mut canvas, keypoints, min_confidence);
    canvas
}

/// Skeleton of the confident keypoints drawn over the frame itself.
pub fn render_overlay(frame: &RgbImage, keypoints: &[Keypoint], min_confidence: f32) -> RgbImage {
    let mut canvas = frame.clone();
    draw_skeleton(&mut canvas, keypoints, min_confidence);
    canvas
}

fn draw_skeleton(canvas: &mut RgbImage, keypoints: &[Keypoint], min_confidence: f32) {
    let (width, height) = canvas.dimensions();
    let to_pixel = |k: &Keypoint| (k.x * width as f32, k.y * height as f32);
    let visible = |i: usize| keypoints.get(i).filter(|k| k.is_reliable(min_confidence));

    for (a, b) in SKELETON_EDGES {
        if let (Some(a), Some(b)) = (visible(a.index()), visible(b.index())) {
            draw_line_segment_mut(canvas, to_pixel(a), to_pixel(b), BONE_COLOR);
        }
    }

    for k in keypoints.iter().filter(|k| k.is_reliable(min_confidence)) {
        let (x, y) = to_pixel(k);
        draw_filled_circle_mut(canvas, (x as i32, y as i32), JOINT_RADIUS, JOINT_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::keypoint::{Joint, JOINT_COUNT};

    fn keypoints_with(joint: Joint, k: Keypoint) -> Vec<Keypoint> {
        let mut keypoints = vec![Keypoint::new(0.0, 0.0, 0.0); JOINT_COUNT];
        keypoints[joint.index()] = k;
        keypoints
    }

    #[test]
    fn test_skeleton_draws_confident_joints_only() {
        let keypoints = keypoints_with(Joint::Nose, Keypoint::new(0.5, 0.5, 0.9));
        let image = render_skeleton(40, 20, &keypoints, 0.3);

        assert_eq!(image.dimensions(), (40, 20));
        assert_eq!(*image.get_pixel(20, 10), JOINT_COLOR);
        // Low-confidence joints at the origin are skipped.
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_bone_connects_shoulders() {
        let mut keypoints = keypoints_with(Joint::LeftShoulder, Keypoint::new(0.1, 0.5, 0.9));
        keypoints[Joint::RightShoulder.index()] = Keypoint::new(0.9, 0.5, 0.9);

        let image = render_skeleton(100, 100, &keypoints, 0.3);
        assert_eq!(*image.get_pixel(50, 50), BONE_COLOR);
    }

    #[test]
    fn test_overlay_keeps_background() {
        let frame = RgbImage::from_pixel(30, 30, Rgb([10, 20, 30]));
        let keypoints = keypoints_with(Joint::Nose, Keypoint::new(0.5, 0.5, 0.9));
        let overlay = render_overlay(&frame, &keypoints, 0.3);

        assert_eq!(*overlay.get_pixel(0, 0), Rgb([10, 20, 30]));
        assert_eq!(*overlay.get_pixel(15, 15), JOINT_COLOR);
    }
}
