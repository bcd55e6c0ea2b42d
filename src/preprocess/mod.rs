//! Document preprocessing.
//!
//! Two optional substages run before detection, in order: a 0/90/180/270
//! orientation classifier that uprights the page, and a UVDoc-style
//! unwarper that flattens curved or photographed documents. Both substages
//! fail soft: any inference problem leaves the image unmodified, logs a
//! warning, and lets the pipeline continue. Detection quads live in the
//! coordinate space of the image this stage produces.

mod uvdoc;

use crate::core::config::DocPreprocConfig;
use crate::core::errors::{OCRError, OcrResult, ProcessingStage};
use crate::core::inference::{NpuEngine, NpuRuntime};
use crate::processors::resize::{resize_exact, to_bgr_hwc};
use image::RgbImage;
use image::imageops;
use std::time::Instant;
use tracing::{debug, warn};

/// Per-substage wall-clock times, in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocPreprocStageTimes {
    /// Orientation classification plus the correction rotation.
    pub orientation_ms: f64,
    /// Unwarp inference plus the remap.
    pub unwarp_ms: f64,
}

/// Result of running the document preprocessor on one image.
#[derive(Debug)]
pub struct DocPreprocResult {
    /// The image subsequent stages should operate on.
    pub image: RgbImage,
    /// Whether an orientation correction was applied.
    pub orientation_applied: bool,
    /// Whether unwarping was applied.
    pub unwarping_applied: bool,
    /// Detected orientation angle in degrees, when classification ran
    /// confidently.
    pub orientation_angle: Option<f32>,
    /// Substage timings.
    pub stage_times: DocPreprocStageTimes,
}

/// Document preprocessor holding the optional orientation and unwarp
/// engines.
pub struct DocPreprocessor {
    config: DocPreprocConfig,
    orientation_engine: Option<Box<dyn NpuEngine>>,
    uvdoc_engine: Option<Box<dyn NpuEngine>>,
}

impl DocPreprocessor {
    /// Loads the engines for the enabled substages.
    ///
    /// Unlike per-image failures, a missing model at initialization is a
    /// hard error.
    pub fn new(runtime: &dyn NpuRuntime, config: DocPreprocConfig) -> OcrResult<Self> {
        config.validate()?;

        let orientation_engine = if config.use_orientation {
            let engine = runtime.load(&config.orientation.model_path)?;
            let classes = engine.output_shape().last().copied().unwrap_or(0);
            if classes != 4 {
                return Err(OCRError::model_load(
                    config.orientation.model_path.display().to_string(),
                    format!("expected a 4-class orientation output, engine declares {classes}"),
                ));
            }
            Some(engine)
        } else {
            None
        };

        let uvdoc_engine = if config.use_unwarping {
            Some(runtime.load(&config.uvdoc.model_path)?)
        } else {
            None
        };

        Ok(Self {
            config,
            orientation_engine,
            uvdoc_engine,
        })
    }

    /// Runs the enabled substages over `image`.
    ///
    /// `use_orientation` / `use_unwarping` further restrict (never extend)
    /// the substages configured at initialization; `None` inherits the
    /// configured toggles. This method never fails: each substage degrades
    /// to a pass-through on error.
    pub fn process(
        &mut self,
        image: &RgbImage,
        use_orientation: Option<bool>,
        use_unwarping: Option<bool>,
    ) -> DocPreprocResult {
        let run_orientation = use_orientation.unwrap_or(self.config.use_orientation)
            && self.orientation_engine.is_some();
        let run_unwarping =
            use_unwarping.unwrap_or(self.config.use_unwarping) && self.uvdoc_engine.is_some();

        let mut current = image.clone();
        let mut stage_times = DocPreprocStageTimes::default();
        let mut orientation_applied = false;
        let mut orientation_angle = None;

        if run_orientation {
            let start = Instant::now();
            match self.classify_orientation(&current) {
                Ok((class_id, confidence)) => {
                    if confidence >= self.config.orientation.confidence_threshold {
                        orientation_angle = Some(class_id as f32 * 90.0);
                        if class_id != 0 {
                            current = rotate_upright(&current, class_id);
                            orientation_applied = true;
                        }
                        debug!(class_id, confidence, "orientation classified");
                    } else {
                        debug!(
                            class_id,
                            confidence, "orientation below threshold; passing through"
                        );
                    }
                }
                Err(error) => {
                    warn!(%error, "orientation classification failed; passing through");
                }
            }
            stage_times.orientation_ms = start.elapsed().as_secs_f64() * 1000.0;
        }

        let mut unwarping_applied = false;
        if run_unwarping {
            let start = Instant::now();
            match self.unwarp(&current) {
                Ok(unwarped) => {
                    current = unwarped;
                    unwarping_applied = true;
                }
                Err(error) => {
                    warn!(%error, "unwarping failed; passing through");
                }
            }
            stage_times.unwarp_ms = start.elapsed().as_secs_f64() * 1000.0;
        }

        DocPreprocResult {
            image: current,
            orientation_applied,
            unwarping_applied,
            orientation_angle,
            stage_times,
        }
    }

    /// Classifies page orientation over a downsampled copy.
    fn classify_orientation(&mut self, image: &RgbImage) -> OcrResult<(usize, f32)> {
        let engine = self
            .orientation_engine
            .as_mut()
            .ok_or_else(|| OCRError::usage("orientation engine not loaded"))?;

        let shape = engine.input_shape().to_vec();
        let (h, w) = (shape[0] as u32, shape[1] as u32);
        let resized = resize_exact(image, w, h)?;
        let buffer = to_bgr_hwc(&resized);

        let tensors = engine
            .run(&buffer)
            .map_err(|e| OCRError::inference("doc_orientation", format!("{e}")))?;
        let output = tensors.first().ok_or_else(|| {
            OCRError::processing(
                ProcessingStage::PostProcessing,
                "doc_orientation returned no output tensors",
            )
        })?;
        if output.data.len() < 4 {
            return Err(OCRError::processing(
                ProcessingStage::PostProcessing,
                format!(
                    "expected 4 class probabilities from doc_orientation, got {}",
                    output.data.len()
                ),
            ));
        }

        let (class_id, confidence) = output.data[..4]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, &p)| (i, p))
            .unwrap_or((0, 0.0));

        Ok((class_id, confidence))
    }

    /// Runs the UVDoc model and remaps the image through its field.
    fn unwarp(&mut self, image: &RgbImage) -> OcrResult<RgbImage> {
        let engine = self
            .uvdoc_engine
            .as_mut()
            .ok_or_else(|| OCRError::usage("uvdoc engine not loaded"))?;

        let resized = resize_exact(
            image,
            self.config.uvdoc.input_width,
            self.config.uvdoc.input_height,
        )?;
        let buffer = to_bgr_hwc(&resized);

        let tensors = engine
            .run(&buffer)
            .map_err(|e| OCRError::inference("uvdoc", format!("{e}")))?;
        let field = uvdoc::displacement_field(&tensors)?;

        Ok(uvdoc::remap_with_field(
            image,
            &field,
            self.config.uvdoc.align_corners,
        ))
    }
}

/// Rotates the image counter-clockwise by `class_id * 90` degrees to bring
/// the page upright.
fn rotate_upright(image: &RgbImage, class_id: usize) -> RgbImage {
    match class_id {
        1 => imageops::rotate270(image),
        2 => imageops::rotate180(image),
        3 => imageops::rotate90(image),
        _ => image.clone(),
    }
}
