//! Text detection.
//!
//! DBNet-style detector with multi-resolution model routing: two engines are
//! loaded at initialization (640 and 960 input squares) and each image
//! routes to one of them by its larger side. Preprocessing pads to a square
//! before resizing; postprocessing happens in [`postprocess`].

pub mod postprocess;

pub use postprocess::{DbPostProcess, DbPostProcessConfig};

use crate::core::config::DetectorConfig;
use crate::core::constants::{DET_TARGET_LARGE, DET_TARGET_SMALL};
use crate::core::errors::{OCRError, OcrResult, ProcessingStage};
use crate::core::inference::{NpuEngine, NpuRuntime, Tensor};
use crate::processors::geometry::BoundingBox;
use crate::processors::resize::{pad_and_resize, to_bgr_hwc};
use crate::processors::sort::sort_detection_boxes;
use image::RgbImage;
use ndarray::Array2;
use postprocess::CoordinateUnmap;
use std::time::Instant;
use tracing::debug;

/// Wall-clock timings of the most recent detection call, in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionTimings {
    /// Padding, resizing, and buffer building.
    pub preprocess_ms: f64,
    /// Engine execution.
    pub inference_ms: f64,
    /// Thresholding, contours, unclipping, unmapping.
    pub postprocess_ms: f64,
}

/// Text detector over a 640/960 engine pair.
pub struct TextDetector {
    config: DetectorConfig,
    engine_640: Box<dyn NpuEngine>,
    engine_960: Box<dyn NpuEngine>,
    postprocess: DbPostProcess,
    last_timings: DetectionTimings,
}

impl TextDetector {
    /// Loads both detection engines.
    pub fn new(runtime: &dyn NpuRuntime, config: DetectorConfig) -> OcrResult<Self> {
        config.validate()?;

        let engine_640 = runtime.load(&config.model_640_path)?;
        let engine_960 = runtime.load(&config.model_960_path)?;
        check_square_input(engine_640.as_ref(), DET_TARGET_SMALL, &config.model_640_path)?;
        check_square_input(engine_960.as_ref(), DET_TARGET_LARGE, &config.model_960_path)?;

        let postprocess = DbPostProcess::new(&config);

        Ok(Self {
            config,
            engine_640,
            engine_960,
            postprocess,
            last_timings: DetectionTimings::default(),
        })
    }

    /// Target model resolution for an image of the given size.
    pub fn target_size(&self, width: u32, height: u32) -> u32 {
        if width.max(height) < self.config.size_threshold {
            DET_TARGET_SMALL
        } else {
            DET_TARGET_LARGE
        }
    }

    /// Detects text quads in `image`, sorted by the top-left corner.
    ///
    /// Coordinates are in the coordinate space of `image`. An empty result
    /// means no text; inference failures are returned as errors for the
    /// caller to collapse into an empty per-image result.
    pub fn detect(
        &mut self,
        image: &RgbImage,
        overrides: Option<&DbPostProcessConfig>,
    ) -> OcrResult<Vec<BoundingBox>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OCRError::invalid_input(format!(
                "cannot detect text in a {width}x{height} image"
            )));
        }

        let target = self.target_size(width, height);

        let start = Instant::now();
        let (resized, info) = pad_and_resize(image, target)?;
        let buffer = to_bgr_hwc(&resized);
        let preprocess_ms = start.elapsed().as_secs_f64() * 1000.0;

        let (engine, model_name) = if target == DET_TARGET_SMALL {
            (&mut self.engine_640, "det_640")
        } else {
            (&mut self.engine_960, "det_960")
        };

        let start = Instant::now();
        let tensors = engine.run(&buffer).map_err(|e| {
            OCRError::inference(model_name, format!("detection inference failed: {e}"))
        })?;
        let inference_ms = start.elapsed().as_secs_f64() * 1000.0;

        let start = Instant::now();
        let pred = probability_map(&tensors, model_name)?;
        let unmap = CoordinateUnmap {
            padded_size: info.padded_size as f32,
            pad_left: info.pad_left as f32,
            pad_top: info.pad_top as f32,
            dest_width: width,
            dest_height: height,
        };
        let boxes = sort_detection_boxes(self.postprocess.apply(&pred.view(), &unmap, overrides));
        let postprocess_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.last_timings = DetectionTimings {
            preprocess_ms,
            inference_ms,
            postprocess_ms,
        };

        debug!(
            target_size = target,
            boxes = boxes.len(),
            preprocess_ms,
            inference_ms,
            postprocess_ms,
            "detection finished"
        );

        Ok(boxes)
    }

    /// Timing details of the most recent `detect` call.
    pub fn last_timings(&self) -> DetectionTimings {
        self.last_timings
    }
}

fn check_square_input(
    engine: &dyn NpuEngine,
    expected: u32,
    model_path: &std::path::Path,
) -> OcrResult<()> {
    let shape = engine.input_shape();
    let expected_shape = [expected as usize, expected as usize, 3];
    if shape != expected_shape {
        return Err(OCRError::model_load(
            model_path.display().to_string(),
            format!("expected {expected_shape:?} HWC input, engine declares {shape:?}"),
        ));
    }
    Ok(())
}

/// Interprets the first output tensor as a 2D probability map.
///
/// Accepts `[H, W]`, `[1, H, W]`, `[1, 1, H, W]`, and `[1, H, W, 1]`
/// layouts; singleton axes do not change the element order.
fn probability_map(tensors: &[Tensor], model_name: &str) -> OcrResult<Array2<f32>> {
    let tensor = tensors.first().ok_or_else(|| {
        OCRError::processing(
            ProcessingStage::PostProcessing,
            format!("{model_name} returned no output tensors"),
        )
    })?;

    let (h, w) = match tensor.shape.as_slice() {
        [h, w] => (*h, *w),
        [1, h, w] => (*h, *w),
        [1, 1, h, w] => (*h, *w),
        [1, h, w, 1] => (*h, *w),
        other => {
            return Err(OCRError::processing(
                ProcessingStage::PostProcessing,
                format!("unexpected probability map shape {other:?} from {model_name}"),
            ));
        }
    };

    Array2::from_shape_vec((h, w), tensor.data.clone()).map_err(|e| {
        OCRError::processing(
            ProcessingStage::PostProcessing,
            format!("probability map reshape failed for {model_name}: {e}"),
        )
    })
}
