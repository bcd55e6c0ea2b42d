//! Text line orientation classification.
//!
//! Decides, per crop, whether a rectified text line is upside down. The
//! model outputs two already-softmaxed class probabilities for the labels
//! "0" and "180"; a confident "180" makes the pipeline rotate the crop by
//! 180 degrees before recognition.

use crate::core::config::ClassifierConfig;
use crate::core::errors::{OCRError, OcrResult, ProcessingStage};
use crate::core::inference::{NpuEngine, NpuRuntime};
use crate::processors::resize::{resize_exact, to_bgr_hwc};
use image::RgbImage;
use tracing::warn;

/// Orientation label of a text line crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOrientation {
    /// The crop is upright.
    Deg0,
    /// The crop is upside down.
    Deg180,
}

impl std::fmt::Display for LineOrientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineOrientation::Deg0 => write!(f, "0"),
            LineOrientation::Deg180 => write!(f, "180"),
        }
    }
}

/// 0/180 degree classifier over rectified text line crops.
pub struct TextLineClassifier {
    config: ClassifierConfig,
    engine: Box<dyn NpuEngine>,
}

impl TextLineClassifier {
    /// Loads the classification engine.
    pub fn new(runtime: &dyn NpuRuntime, config: ClassifierConfig) -> OcrResult<Self> {
        config.validate()?;
        let engine = runtime.load(&config.model_path)?;

        let classes = engine.output_shape().last().copied().unwrap_or(0);
        if classes != 2 {
            return Err(OCRError::model_load(
                config.model_path.display().to_string(),
                format!("expected a 2-class output, engine declares {classes}"),
            ));
        }

        Ok(Self { config, engine })
    }

    /// Classifies one crop.
    ///
    /// The model output is already softmaxed; no additional softmax is
    /// applied here.
    pub fn classify(&mut self, crop: &RgbImage) -> OcrResult<(LineOrientation, f32)> {
        let (w, h) = crop.dimensions();
        if w == 0 || h == 0 {
            return Err(OCRError::invalid_input("cannot classify an empty crop"));
        }

        let resized = resize_exact(crop, self.config.input_width, self.config.input_height)?;
        let buffer = to_bgr_hwc(&resized);

        let tensors = self.engine.run(&buffer).map_err(|e| {
            OCRError::inference("textline_cls", format!("classification failed: {e}"))
        })?;
        let output = tensors.first().ok_or_else(|| {
            OCRError::processing(
                ProcessingStage::PostProcessing,
                "textline_cls returned no output tensors",
            )
        })?;
        if output.data.len() < 2 {
            return Err(OCRError::processing(
                ProcessingStage::PostProcessing,
                format!(
                    "expected 2 class probabilities from textline_cls, got {}",
                    output.data.len()
                ),
            ));
        }

        let p0 = output.data[0];
        let p180 = output.data[1];
        if p180 > p0 {
            Ok((LineOrientation::Deg180, p180))
        } else {
            Ok((LineOrientation::Deg0, p0))
        }
    }

    /// Classifies a batch of crops.
    ///
    /// Semantically equivalent to per-crop calls; a failed crop degrades to
    /// an unrotated, zero-confidence result so the batch keeps its shape.
    pub fn classify_batch(&mut self, crops: &[RgbImage]) -> Vec<(LineOrientation, f32)> {
        crops
            .iter()
            .map(|crop| match self.classify(crop) {
                Ok(result) => result,
                Err(error) => {
                    warn!(%error, "text line classification failed; leaving crop unrotated");
                    (LineOrientation::Deg0, 0.0)
                }
            })
            .collect()
    }

    /// Whether a classification outcome should rotate the crop.
    pub fn needs_rotation(
        &self,
        orientation: LineOrientation,
        confidence: f32,
        threshold: Option<f32>,
    ) -> bool {
        let threshold = threshold.unwrap_or(self.config.threshold);
        orientation == LineOrientation::Deg180 && confidence > threshold
    }
}
