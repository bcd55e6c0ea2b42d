//! Displacement-field remapping for document unwarping.
//!
//! The UVDoc model emits a two-channel field of normalized sampling
//! coordinates in `[-1, 1]` at its fixed input resolution. Unwarping
//! bilinearly upsamples that field to the source resolution and resamples
//! the source image through it, so the output has the source dimensions.

use crate::core::errors::{OCRError, OcrResult, ProcessingStage};
use crate::core::inference::Tensor;
use crate::utils::transform::bilinear_interpolate;
use image::RgbImage;
use ndarray::Array3;

/// Interprets the first output tensor as a `[2, H, W]` displacement field.
pub(crate) fn displacement_field(tensors: &[Tensor]) -> OcrResult<Array3<f32>> {
    let tensor = tensors.first().ok_or_else(|| {
        OCRError::processing(
            ProcessingStage::PostProcessing,
            "uvdoc returned no output tensors",
        )
    })?;

    let (c, h, w) = match tensor.shape.as_slice() {
        [2, h, w] => (2usize, *h, *w),
        [1, 2, h, w] => (2usize, *h, *w),
        other => {
            return Err(OCRError::processing(
                ProcessingStage::PostProcessing,
                format!("unexpected displacement field shape {other:?} from uvdoc"),
            ));
        }
    };

    Array3::from_shape_vec((c, h, w), tensor.data.clone()).map_err(|e| {
        OCRError::processing(
            ProcessingStage::PostProcessing,
            format!("field reshape failed for uvdoc: {e}"),
        )
    })
}

/// Samples one field channel at a fractional coordinate with clamped
/// borders.
fn sample_field(field: &Array3<f32>, channel: usize, x: f32, y: f32) -> f32 {
    let h = field.shape()[1];
    let w = field.shape()[2];

    let x0 = (x.floor() as i64).clamp(0, w as i64 - 1) as usize;
    let y0 = (y.floor() as i64).clamp(0, h as i64 - 1) as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);

    let dx = (x - x0 as f32).clamp(0.0, 1.0);
    let dy = (y - y0 as f32).clamp(0.0, 1.0);

    let v00 = field[[channel, y0, x0]];
    let v01 = field[[channel, y0, x1]];
    let v10 = field[[channel, y1, x0]];
    let v11 = field[[channel, y1, x1]];

    (1.0 - dy) * ((1.0 - dx) * v00 + dx * v01) + dy * ((1.0 - dx) * v10 + dx * v11)
}

/// Remaps `src` through a `[2, fh, fw]` normalized sampling field.
///
/// Channel 0 holds x, channel 1 holds y, both in `[-1, 1]`. The field is
/// upsampled bilinearly to the source resolution on the fly; the remap
/// samples the source with bilinear interpolation.
pub(crate) fn remap_with_field(
    src: &RgbImage,
    field: &Array3<f32>,
    align_corners: bool,
) -> RgbImage {
    let (width, height) = src.dimensions();
    let fh = field.shape()[1] as f32;
    let fw = field.shape()[2] as f32;

    let mut out = RgbImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            // Output pixel -> field coordinate.
            let (fx, fy) = if align_corners {
                let fx = if width > 1 {
                    x as f32 * (fw - 1.0) / (width as f32 - 1.0)
                } else {
                    0.0
                };
                let fy = if height > 1 {
                    y as f32 * (fh - 1.0) / (height as f32 - 1.0)
                } else {
                    0.0
                };
                (fx, fy)
            } else {
                (
                    (x as f32 + 0.5) * fw / width as f32 - 0.5,
                    (y as f32 + 0.5) * fh / height as f32 - 0.5,
                )
            };

            let u = sample_field(field, 0, fx, fy);
            let v = sample_field(field, 1, fx, fy);

            // Normalized coordinate -> source pixel.
            let (sx, sy) = if align_corners {
                (
                    (u + 1.0) / 2.0 * (width as f32 - 1.0),
                    (v + 1.0) / 2.0 * (height as f32 - 1.0),
                )
            } else {
                (
                    ((u + 1.0) * width as f32 - 1.0) / 2.0,
                    ((v + 1.0) * height as f32 - 1.0) / 2.0,
                )
            };

            out.put_pixel(x, y, bilinear_interpolate(src, sx, sy));
        }
    }

    out
}
