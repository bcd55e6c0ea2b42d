//! Post-processing for DB (Differentiable Binarization) detection output.
//!
//! Converts a dense probability map into scored text quads: threshold to a
//! binary mask, extract outer contours, score each candidate by its mean
//! probability, expand surviving boxes by polygon offsetting, and map the
//! coordinates back into the preprocessed-image space.

use crate::core::config::DetectorConfig;
use crate::processors::geometry::{
    BoundingBox, Point, ScanlineBuffer, clip_to_image, order_clockwise, unclip,
};
use image::{GrayImage, Luma};
use imageproc::contours::{BorderType, find_contours};
use ndarray::ArrayView2;

/// Runtime configuration for DB post-processing.
///
/// Holds the parameters that may vary per inference call through the
/// per-task overrides; everything else stays on [`DbPostProcess`].
#[derive(Debug, Clone, Copy)]
pub struct DbPostProcessConfig {
    /// Threshold for binarizing the probability map.
    pub thresh: f32,
    /// Threshold for filtering boxes by their mean probability.
    pub box_thresh: f32,
    /// Ratio for unclipping (expanding) boxes.
    pub unclip_ratio: f32,
}

/// Maps probability-map coordinates back into the preprocessed image.
///
/// The model saw a `padded_size` square resized to the map resolution, so
/// `x_src = x_map * (padded_size / map_w) - pad_left`, clipped to the
/// destination image.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CoordinateUnmap {
    pub padded_size: f32,
    pub pad_left: f32,
    pub pad_top: f32,
    pub dest_width: u32,
    pub dest_height: u32,
}

impl CoordinateUnmap {
    fn unmap(&self, p: Point, map_w: f32, map_h: f32) -> Point {
        Point::new(
            p.x * (self.padded_size / map_w) - self.pad_left,
            p.y * (self.padded_size / map_h) - self.pad_top,
        )
    }
}

/// Post-processor for DB-style text detection models.
#[derive(Debug)]
pub struct DbPostProcess {
    thresh: f32,
    box_thresh: f32,
    unclip_ratio: f32,
    max_candidates: usize,
    /// Minimum side length of a candidate rectangle, in map pixels.
    min_size: f32,
}

impl DbPostProcess {
    /// Creates a post-processor from the detector configuration.
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            thresh: config.thresh,
            box_thresh: config.box_thresh,
            unclip_ratio: config.unclip_ratio,
            max_candidates: config.max_candidates,
            min_size: 3.0,
        }
    }

    /// Extracts text quads from one probability map.
    ///
    /// Candidates are scored by their mean probability and dropped below
    /// `box_thresh`; surviving quads are returned without their scores.
    /// `overrides`, when present, replaces the stored thresholds for this
    /// call only. An all-below-threshold map produces an empty vector, not
    /// an error.
    pub(crate) fn apply(
        &self,
        pred: &ArrayView2<f32>,
        unmap: &CoordinateUnmap,
        overrides: Option<&DbPostProcessConfig>,
    ) -> Vec<BoundingBox> {
        let thresh = overrides.map(|c| c.thresh).unwrap_or(self.thresh);
        let box_thresh = overrides.map(|c| c.box_thresh).unwrap_or(self.box_thresh);
        let unclip_ratio = overrides.map(|c| c.unclip_ratio).unwrap_or(self.unclip_ratio);

        let map_h = pred.shape()[0];
        let map_w = pred.shape()[1];
        if map_h == 0 || map_w == 0 {
            return Vec::new();
        }

        let mut mask = GrayImage::new(map_w as u32, map_h as u32);
        for y in 0..map_h {
            for x in 0..map_w {
                let value = if pred[[y, x]] > thresh { 255 } else { 0 };
                mask.put_pixel(x as u32, y as u32, Luma([value]));
            }
        }

        let mut contours: Vec<BoundingBox> = find_contours::<u32>(&mask)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer)
            .map(|c| BoundingBox::from_contour(&c))
            .collect();

        // Largest candidates first; everything past the cap is dropped.
        contours.sort_by(|a, b| {
            b.area()
                .partial_cmp(&a.area())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        contours.truncate(self.max_candidates);

        let mut scanline = ScanlineBuffer::new(
            contours.iter().map(|c| c.points.len()).max().unwrap_or(4) + 4,
        );
        let mut boxes = Vec::new();

        for contour in &contours {
            let rect = contour.min_area_rect();
            if rect.min_side() < self.min_size {
                continue;
            }

            let score = self.box_score(pred, contour, &rect.box_points(), &mut scanline);
            if score < box_thresh {
                continue;
            }

            let quad = rect.box_points();
            let Some(expanded) = unclip(&quad, unclip_ratio) else {
                continue;
            };
            let Ok(expanded_quad) = expanded.as_quad() else {
                continue;
            };

            let unmapped =
                expanded_quad.map(|p| unmap.unmap(p, map_w as f32, map_h as f32));
            let clipped = clip_to_image(&unmapped, unmap.dest_width, unmap.dest_height);
            let ordered = order_clockwise(&clipped);

            boxes.push(BoundingBox::new(ordered.to_vec()));
        }

        boxes
    }

    /// Mean probability inside the contour; contours too thin to rasterize
    /// fall back to the mean over the candidate rectangle's bounding box.
    fn box_score(
        &self,
        pred: &ArrayView2<f32>,
        contour: &BoundingBox,
        rect_points: &[Point; 4],
        scanline: &mut ScanlineBuffer,
    ) -> f32 {
        let map_h = pred.shape()[0];
        let map_w = pred.shape()[1];

        let polygon_score = |polygon: &BoundingBox, scanline: &mut ScanlineBuffer| {
            let y_start = polygon.y_min().floor().max(0.0) as usize;
            let y_end = (polygon.y_max().ceil() as usize).min(map_h);
            let x_start = polygon.x_min().floor().max(0.0) as usize;
            let x_end = (polygon.x_max().ceil() as usize).min(map_w);

            let mut total = 0.0;
            let mut pixels = 0usize;
            for y in y_start..y_end {
                let (score, count) =
                    scanline.process_scanline(y as f32 + 0.5, polygon, x_start, x_end, pred);
                total += score;
                pixels += count;
            }
            (total, pixels)
        };

        let (total, pixels) = polygon_score(contour, scanline);
        if pixels > 0 {
            return total / pixels as f32;
        }

        // Thin contour: average over the rectangle's axis-aligned extent.
        let rect_box = BoundingBox::new(rect_points.to_vec());
        let y_start = rect_box.y_min().floor().max(0.0) as usize;
        let y_end = ((rect_box.y_max().ceil() as usize) + 1).min(map_h);
        let x_start = rect_box.x_min().floor().max(0.0) as usize;
        let x_end = ((rect_box.x_max().ceil() as usize) + 1).min(map_w);

        let mut total = 0.0;
        let mut pixels = 0usize;
        for y in y_start..y_end {
            for x in x_start..x_end {
                total += pred[[y, x]];
                pixels += 1;
            }
        }
        if pixels == 0 { 0.0 } else { total / pixels as f32 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn unmap_identity(w: u32, h: u32, size: f32) -> CoordinateUnmap {
        CoordinateUnmap {
            padded_size: size,
            pad_left: 0.0,
            pad_top: 0.0,
            dest_width: w,
            dest_height: h,
        }
    }

    fn map_with_blob(h: usize, w: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> Array2<f32> {
        let mut pred = Array2::from_elem((h, w), 0.05f32);
        for y in y0..y1 {
            for x in x0..x1 {
                pred[[y, x]] = 0.95;
            }
        }
        pred
    }

    fn default_postprocess() -> DbPostProcess {
        let config = DetectorConfig {
            model_640_path: "m640".into(),
            model_960_path: "m960".into(),
            ..DetectorConfig::default()
        };
        DbPostProcess::new(&config)
    }

    #[test]
    fn test_blob_produces_one_expanded_quad() {
        let pred = map_with_blob(64, 64, 10, 20, 40, 30);
        let pp = default_postprocess();
        let boxes = pp.apply(&pred.view(), &unmap_identity(64, 64, 64.0), None);

        assert_eq!(boxes.len(), 1);
        let bbox = &boxes[0];

        // Unclipping must grow the box beyond the drawn blob.
        assert!(bbox.x_min() < 10.0);
        assert!(bbox.x_max() > 39.0);
        assert!(bbox.y_min() < 20.0);
        assert!(bbox.y_max() > 29.0);

        // And the quad is canonical.
        let quad = bbox.as_quad().unwrap();
        assert_eq!(order_clockwise(&quad), quad);
    }

    #[test]
    fn test_all_below_threshold_is_empty_not_error() {
        let pred = Array2::from_elem((32, 32), 0.1f32);
        let pp = default_postprocess();
        let boxes = pp.apply(&pred.view(), &unmap_identity(32, 32, 32.0), None);
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_low_score_blob_filtered_by_box_thresh() {
        let mut pred = Array2::from_elem((64, 64), 0.0f32);
        for y in 20..30 {
            for x in 10..40 {
                // Above the binarization threshold but below box_thresh.
                pred[[y, x]] = 0.4;
            }
        }
        let pp = default_postprocess();
        let boxes = pp.apply(&pred.view(), &unmap_identity(64, 64, 64.0), None);
        assert!(boxes.is_empty());

        // A runtime override can admit the same blob.
        let overrides = DbPostProcessConfig {
            thresh: 0.3,
            box_thresh: 0.2,
            unclip_ratio: 1.5,
        };
        let boxes = pp.apply(&pred.view(), &unmap_identity(64, 64, 64.0), Some(&overrides));
        assert_eq!(boxes.len(), 1);
    }

    #[test]
    fn test_unmap_scales_to_source_space() {
        // Map is 64x64 but the source square was 128: coordinates double.
        let pred = map_with_blob(64, 64, 10, 20, 40, 30);
        let pp = default_postprocess();
        let boxes = pp.apply(&pred.view(), &unmap_identity(128, 128, 128.0), None);
        assert_eq!(boxes.len(), 1);
        let bbox = &boxes[0];
        assert!(bbox.x_max() > 78.0, "x_max {}", bbox.x_max());
        assert!(bbox.y_max() > 58.0, "y_max {}", bbox.y_max());
    }

    #[test]
    fn test_tiny_contour_dropped_by_min_size() {
        let pred = map_with_blob(64, 64, 30, 30, 32, 32);
        let pp = default_postprocess();
        let boxes = pp.apply(&pred.view(), &unmap_identity(64, 64, 64.0), None);
        assert!(boxes.is_empty());
    }
}
