//! Resize and padding operations for model preprocessing.
//!
//! Detection pads images to a square before resizing (order matters: the
//! other way around changes the aspect ratio), recognition resizes to a
//! fixed height and right-pads to an aspect-ratio bucket width. Model input
//! buffers are uint8 HWC in BGR channel order; normalization is compiled
//! into the models and must not be applied here.

use crate::core::constants::REC_ASPECT_BUCKETS;
use crate::core::errors::{OCRError, OcrResult};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Coordinate bookkeeping for [`pad_and_resize`].
///
/// Maps model-space coordinates back to the source image:
/// `x_src = x_model * (padded_size / model_w) - pad_left` (and the same for
/// `y` with `pad_top`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PadResizeInfo {
    /// Pixels of padding added on the left of the source image.
    pub pad_left: u32,
    /// Pixels of padding added on the top of the source image.
    pub pad_top: u32,
    /// Side length of the intermediate padded square.
    pub padded_size: u32,
    /// `target / padded_size`.
    pub scale: f32,
}

/// Pads the shorter side with black to a square of side `max(H, W)`, then
/// resizes to `target x target` with bilinear interpolation.
///
/// Padding is applied on the right and bottom, so `pad_left` and `pad_top`
/// are zero; they are reported anyway because the coordinate unmapping
/// formula consumes them.
pub fn pad_and_resize(img: &RgbImage, target: u32) -> OcrResult<(RgbImage, PadResizeInfo)> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(OCRError::invalid_input(format!(
            "cannot pad a {w}x{h} image"
        )));
    }
    if target == 0 {
        return Err(OCRError::invalid_input("target size must be positive"));
    }

    let side = w.max(h);
    let padded = if w == h {
        img.clone()
    } else {
        let mut canvas = RgbImage::new(side, side);
        imageops::overlay(&mut canvas, img, 0, 0);
        canvas
    };

    let resized = imageops::resize(&padded, target, target, FilterType::Triangle);

    Ok((
        resized,
        PadResizeInfo {
            pad_left: 0,
            pad_top: 0,
            padded_size: side,
            scale: target as f32 / side as f32,
        },
    ))
}

/// Returns the smallest recognition aspect bucket that is at least `ratio`,
/// capped at the widest bucket.
pub fn aspect_bucket(ratio: f32) -> u32 {
    let last = REC_ASPECT_BUCKETS[REC_ASPECT_BUCKETS.len() - 1];
    REC_ASPECT_BUCKETS
        .into_iter()
        .find(|&b| b as f32 >= ratio)
        .unwrap_or(last)
}

/// Resizes to height `target_h` preserving aspect ratio, then pads on the
/// right with black to width `target_h * bucket`.
///
/// The resized width is clamped to the bucket width, so crops wider than the
/// widest bucket are squeezed rather than truncated.
pub fn pad_and_resize_keep_ratio(img: &RgbImage, target_h: u32, bucket: u32) -> OcrResult<RgbImage> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(OCRError::invalid_input(format!(
            "cannot resize a {w}x{h} image"
        )));
    }
    if target_h == 0 || bucket == 0 {
        return Err(OCRError::invalid_input(
            "target height and bucket must be positive",
        ));
    }

    let full_width = target_h * bucket;
    let ratio = w as f32 / h as f32;
    let resized_w = ((target_h as f32 * ratio).round() as u32).clamp(1, full_width);

    let resized = imageops::resize(img, resized_w, target_h, FilterType::Triangle);
    if resized_w == full_width {
        return Ok(resized);
    }

    let mut canvas = RgbImage::new(full_width, target_h);
    imageops::overlay(&mut canvas, &resized, 0, 0);
    Ok(canvas)
}

/// Plain bilinear resize to an exact size.
pub fn resize_exact(img: &RgbImage, width: u32, height: u32) -> OcrResult<RgbImage> {
    if width == 0 || height == 0 {
        return Err(OCRError::invalid_input(format!(
            "cannot resize to {width}x{height}"
        )));
    }
    Ok(imageops::resize(img, width, height, FilterType::Triangle))
}

/// Builds the contiguous uint8 HWC BGR buffer an engine consumes.
///
/// Only the channel swap happens here; values stay raw uint8.
pub fn to_bgr_hwc(img: &RgbImage) -> Vec<u8> {
    let mut buffer = Vec::with_capacity((img.width() * img.height() * 3) as usize);
    for pixel in img.pixels() {
        let [r, g, b] = pixel.0;
        buffer.push(b);
        buffer.push(g);
        buffer.push(r);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_pad_and_resize_landscape() {
        let mut img = RgbImage::new(200, 100);
        img.put_pixel(0, 0, Rgb([255, 255, 255]));
        let (out, info) = pad_and_resize(&img, 100).unwrap();

        assert_eq!(out.dimensions(), (100, 100));
        assert_eq!(info.padded_size, 200);
        assert_eq!(info.pad_left, 0);
        assert_eq!(info.pad_top, 0);
        assert!((info.scale - 0.5).abs() < 1e-6);

        // Bottom half of the square is padding, so it stays black.
        assert_eq!(*out.get_pixel(50, 90), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_pad_and_resize_rejects_empty() {
        let img = RgbImage::new(0, 10);
        assert!(pad_and_resize(&img, 100).is_err());
    }

    #[test]
    fn test_aspect_bucket_routing() {
        assert_eq!(aspect_bucket(0.5), 3);
        assert_eq!(aspect_bucket(3.0), 3);
        assert_eq!(aspect_bucket(3.1), 5);
        assert_eq!(aspect_bucket(12.0), 15);
        assert_eq!(aspect_bucket(35.0), 35);
        // Wider than the widest bucket is clamped.
        assert_eq!(aspect_bucket(60.0), 35);
    }

    #[test]
    fn test_keep_ratio_pads_right() {
        let mut img = RgbImage::new(96, 48);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([200, 200, 200]);
        }
        let out = pad_and_resize_keep_ratio(&img, 48, 3).unwrap();
        assert_eq!(out.dimensions(), (144, 48));

        // Content occupies the left 96 columns; the right is padding.
        assert_eq!(*out.get_pixel(40, 20), Rgb([200, 200, 200]));
        assert_eq!(*out.get_pixel(140, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_keep_ratio_clamps_overwide_crop() {
        let img = RgbImage::new(4800, 48);
        let out = pad_and_resize_keep_ratio(&img, 48, 35).unwrap();
        assert_eq!(out.dimensions(), (48 * 35, 48));
    }

    #[test]
    fn test_to_bgr_hwc_swaps_channels() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([10, 20, 30]));
        img.put_pixel(1, 0, Rgb([1, 2, 3]));
        assert_eq!(to_bgr_hwc(&img), vec![30, 20, 10, 3, 2, 1]);
    }
}
