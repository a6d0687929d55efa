use ndarray::{Array, Array4, ArrayViewD, Axis, Ix2};
use image::{DynamicImage, GenericImageView};
use anyhow::{Result, anyhow};

use crate::pose::keypoint::{Keypoint, JOINT_COUNT};

pub fn normalize_for_pose(image: &DynamicImage, input_size: u32) -> Result<Array4<f32>> {
    // Pose model: square NCHW input, pixel values divided by 255.0 (0.0-1.0 range).
    let size = input_size as usize;
    let resized = image.resize_exact(input_size, input_size, image::imageops::FilterType::Triangle);
    let mut array = Array::zeros((1, 3, size, size));

    for (x, y, pixel) in resized.pixels() {
        array[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
        array[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
        array[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
    }

    Ok(array)
}

/// Reads `(y, x, score)` rows from a `[1, 1, 17, 3]` or `[1, 17, 3]` output tensor.
pub fn decode_keypoints(output: ArrayViewD<'_, f32>) -> Result<Vec<Keypoint>> {
    let mut rows = output;
    while rows.ndim() > 2 {
        if rows.shape()[0] != 1 {
            return Err(anyhow!("Expected a single pose, got output shape {:?}", output_shape(&rows)));
        }
        rows = rows.index_axis_move(Axis(0), 0);
    }

    let rows = rows
        .into_dimensionality::<Ix2>()
        .map_err(|e| anyhow!("Unexpected pose output layout: {}", e))?;
    if rows.shape() != [JOINT_COUNT, 3] {
        return Err(anyhow!("Expected {} keypoint rows of 3 values, got {:?}", JOINT_COUNT, rows.shape()));
    }

    Ok(rows
        .outer_iter()
        .map(|row| Keypoint::new(row[1].clamp(0.0, 1.0), row[0].clamp(0.0, 1.0), row[2]))
        .collect())
}

fn output_shape(view: &ArrayViewD<'_, f32>) -> Vec<usize> {
    view.shape().to_vec()
}
