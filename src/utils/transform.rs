//! Perspective transformation utilities.
//!
//! Text quads are rarely axis-aligned; recognition wants a rectified,
//! axis-aligned crop. This module builds the perspective transform from a
//! quad to its bounding rectangle and applies it with bilinear sampling.

use crate::core::errors::{OCRError, OcrResult, ProcessingStage};
use crate::processors::geometry::Point;
use image::{Rgb, RgbImage, imageops};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use tracing::debug;

/// Aspect ratio above which a rectified crop is treated as vertical text and
/// rotated to landscape.
const PORTRAIT_ROTATE_RATIO: f32 = 1.5;

/// Extracts a rectified crop of the quadrilateral region `quad` from
/// `src_image`.
///
/// The quad is expected in canonical clockwise order starting at the
/// top-left. The target rectangle measures the longer of each pair of
/// opposite edges, so skewed quads keep their content. Sampling is
/// bilinear. When the rectified crop is at least 1.5x taller than wide it
/// is rotated 90 degrees clockwise to normalize vertical text lines.
///
/// # Errors
///
/// Returns an error when the quad lies outside the image, when the target
/// rectangle would be empty, or when the perspective system is singular.
pub fn get_rotate_crop_image(src_image: &RgbImage, quad: &[Point; 4]) -> OcrResult<RgbImage> {
    // Crop the axis-aligned bounding rectangle first so the warp only
    // touches relevant pixels.
    let min_x = quad.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let max_x = quad.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let min_y = quad.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_y = quad.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);

    let left = min_x.max(0.0) as u32;
    let top = min_y.max(0.0) as u32;
    let right = (max_x.ceil().min(src_image.width() as f32)) as u32;
    let bottom = (max_y.ceil().min(src_image.height() as f32)) as u32;

    if right <= left || bottom <= top {
        return Err(OCRError::processing(
            ProcessingStage::ImageProcessing,
            "crop region outside the image",
        ));
    }

    let img_crop =
        imageops::crop_imm(src_image, left, top, right - left, bottom - top).to_image();

    let local: Vec<Point> = quad
        .iter()
        .map(|p| Point::new(p.x - left as f32, p.y - top as f32))
        .collect();

    // Target dimensions from the longer of each opposite-edge pair.
    let crop_width = local[0]
        .distance(&local[1])
        .max(local[3].distance(&local[2]))
        .round() as u32;
    let crop_height = local[0]
        .distance(&local[3])
        .max(local[1].distance(&local[2]))
        .round() as u32;

    if crop_width == 0 || crop_height == 0 {
        return Err(OCRError::processing(
            ProcessingStage::ImageProcessing,
            "degenerate crop dimensions",
        ));
    }

    let destination = [
        Point::new(0.0, 0.0),
        Point::new(crop_width as f32, 0.0),
        Point::new(crop_width as f32, crop_height as f32),
        Point::new(0.0, crop_height as f32),
    ];

    let transform = get_perspective_transform(&local, &destination)?;
    let dst_img = warp_perspective(&img_crop, &transform, crop_width, crop_height)?;

    if dst_img.height() as f32 >= dst_img.width() as f32 * PORTRAIT_ROTATE_RATIO {
        debug!(
            width = dst_img.width(),
            height = dst_img.height(),
            "rotating vertical crop to landscape"
        );
        Ok(imageops::rotate90(&dst_img))
    } else {
        Ok(dst_img)
    }
}

/// Solves for the 3x3 perspective matrix mapping four source points onto
/// four destination points.
fn get_perspective_transform(src_points: &[Point], dst_points: &[Point]) -> OcrResult<Matrix3<f32>> {
    if src_points.len() != 4 || dst_points.len() != 4 {
        return Err(OCRError::processing(
            ProcessingStage::ImageProcessing,
            "perspective transform needs exactly 4 point pairs",
        ));
    }

    let mut a = nalgebra::DMatrix::<f32>::zeros(8, 8);
    let mut b = nalgebra::DVector::<f32>::zeros(8);

    for i in 0..4 {
        let src = &src_points[i];
        let dst = &dst_points[i];

        a.set_row(
            i * 2,
            &nalgebra::RowDVector::from_row_slice(&[
                src.x,
                src.y,
                1.0,
                0.0,
                0.0,
                0.0,
                -src.x * dst.x,
                -src.y * dst.x,
            ]),
        );
        b[i * 2] = dst.x;

        a.set_row(
            i * 2 + 1,
            &nalgebra::RowDVector::from_row_slice(&[
                0.0,
                0.0,
                0.0,
                src.x,
                src.y,
                1.0,
                -src.x * dst.y,
                -src.y * dst.y,
            ]),
        );
        b[i * 2 + 1] = dst.y;
    }

    let decomp = a.lu();
    let solution = decomp.solve(&b).ok_or_else(|| {
        OCRError::processing(
            ProcessingStage::ImageProcessing,
            "cannot solve perspective transformation",
        )
    })?;

    Ok(Matrix3::new(
        solution[0],
        solution[1],
        solution[2],
        solution[3],
        solution[4],
        solution[5],
        solution[6],
        solution[7],
        1.0,
    ))
}

/// Applies a perspective transform by inverse mapping with bilinear
/// interpolation. Rows are processed in parallel for larger outputs.
fn warp_perspective(
    src_image: &RgbImage,
    transform_matrix: &Matrix3<f32>,
    dst_width: u32,
    dst_height: u32,
) -> OcrResult<RgbImage> {
    let inv_matrix = transform_matrix
        .try_inverse()
        .ok_or_else(|| {
            OCRError::processing(
                ProcessingStage::ImageProcessing,
                "cannot invert transformation matrix",
            )
        })?;

    let mut dst_image = RgbImage::new(dst_width, dst_height);
    let buffer: &mut [u8] = dst_image.as_mut();

    let fill_row = |dst_y: usize, row_buffer: &mut [u8]| {
        for dst_x in 0..dst_width {
            let dst_point = Vector3::new(dst_x as f32, dst_y as f32, 1.0);
            let src_point = inv_matrix * dst_point;
            let final_pixel = if src_point.z.abs() > f32::EPSILON {
                bilinear_interpolate(src_image, src_point.x / src_point.z, src_point.y / src_point.z)
            } else {
                *src_image.get_pixel(0, 0)
            };
            let index = (dst_x * 3) as usize;
            row_buffer[index..index + 3].copy_from_slice(&final_pixel.0);
        }
    };

    // Sequential fast path keeps single-row crops off the thread pool.
    if dst_height <= 1 {
        fill_row(0, &mut buffer[0..(dst_width * 3) as usize]);
    } else {
        buffer
            .par_chunks_mut((dst_width * 3) as usize)
            .enumerate()
            .for_each(|(dst_y, row_buffer)| fill_row(dst_y, row_buffer));
    }

    Ok(dst_image)
}

/// Reads a pixel with border replication for out-of-bounds coordinates.
#[inline]
fn get_pixel_replicate(image: &RgbImage, x: i32, y: i32) -> Rgb<u8> {
    let clamped_x = x.clamp(0, image.width() as i32 - 1) as u32;
    let clamped_y = y.clamp(0, image.height() as i32 - 1) as u32;
    *image.get_pixel(clamped_x, clamped_y)
}

/// Bilinear interpolation at a fractional coordinate with replicated
/// borders.
pub(crate) fn bilinear_interpolate(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x_int = x.floor() as i32;
    let y_int = y.floor() as i32;

    let dx = x - x_int as f32;
    let dy = y - y_int as f32;

    let p11 = get_pixel_replicate(image, x_int, y_int);
    let p12 = get_pixel_replicate(image, x_int, y_int + 1);
    let p21 = get_pixel_replicate(image, x_int + 1, y_int);
    let p22 = get_pixel_replicate(image, x_int + 1, y_int + 1);

    let mut result = [0u8; 3];
    for (i, result_channel) in result.iter_mut().enumerate() {
        let val = (1.0 - dx) * (1.0 - dy) * p11.0[i] as f32
            + dx * (1.0 - dy) * p21.0[i] as f32
            + (1.0 - dx) * dy * p12.0[i] as f32
            + dx * dy * p22.0[i] as f32;
        *result_channel = val.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}
