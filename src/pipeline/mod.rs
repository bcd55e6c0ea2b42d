//! The synchronous OCR pipeline.
//!
//! Orchestrates the five stages over one image: document preprocessing,
//! detection, crop extraction, optional orientation classification, and
//! recognition, followed by reading-order assembly. The pipeline
//! exclusively owns the engines; components borrow them and every engine
//! call is serialized through `&mut self`.

pub mod async_pipeline;
pub mod collector;

pub use async_pipeline::{AsyncOcrPipeline, AsyncTaskResult};
pub use collector::ResultCollector;

use crate::classification::TextLineClassifier;
use crate::core::config::{PipelineConfig, PipelineTaskConfig};
use crate::core::errors::{OCRError, OcrResult};
use crate::core::inference::NpuRuntime;
use crate::detection::{DbPostProcessConfig, TextDetector};
use crate::preprocess::DocPreprocessor;
use crate::processors::geometry::BoundingBox;
use crate::processors::sort::compare_reading_order;
use crate::recognition::TextRecognizer;
use crate::utils::transform::get_rotate_crop_image;
use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One recognized text region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// The detection quad, clockwise from the top-left, in the coordinate
    /// space of the preprocessed image.
    pub quad: BoundingBox,
    /// Recognized text.
    pub text: String,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f32,
    /// Position after the final reading-order sort; 0-based and unique.
    pub index: usize,
}

/// Per-stage wall-clock statistics for one `process` call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Document preprocessing time (ms).
    pub preprocessing_time_ms: f64,
    /// Detection time (ms).
    pub detection_time_ms: f64,
    /// Classification time (ms).
    pub classification_time_ms: f64,
    /// Recognition time (ms).
    pub recognition_time_ms: f64,
    /// End-to-end time (ms).
    pub total_time_ms: f64,
    /// Number of detected boxes.
    pub detected_boxes: usize,
    /// Number of crops rotated by the classifier.
    pub rotated_boxes: usize,
    /// Number of boxes that produced a recognition result.
    pub recognized_boxes: usize,
    /// `recognized_boxes / detected_boxes`, in percent.
    pub recognition_rate: f64,
}

impl PipelineStats {
    fn finish(&mut self) {
        self.recognition_rate = if self.detected_boxes == 0 {
            0.0
        } else {
            self.recognized_boxes as f64 / self.detected_boxes as f64 * 100.0
        };
    }

    /// Traces the same summary the stats display prints.
    pub fn log_summary(&self) {
        info!(
            detection_ms = self.detection_time_ms,
            classification_ms = self.classification_time_ms,
            recognition_ms = self.recognition_time_ms,
            total_ms = self.total_time_ms,
            detected = self.detected_boxes,
            rotated = self.rotated_boxes,
            recognized = self.recognized_boxes,
            recognition_rate = self.recognition_rate,
            "pipeline statistics"
        );
    }
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "detection: {:.2} ms", self.detection_time_ms)?;
        writeln!(f, "classification: {:.2} ms", self.classification_time_ms)?;
        writeln!(f, "recognition: {:.2} ms", self.recognition_time_ms)?;
        writeln!(f, "total: {:.2} ms", self.total_time_ms)?;
        writeln!(
            f,
            "boxes: {} detected, {} rotated, {} recognized ({:.1}%)",
            self.detected_boxes, self.rotated_boxes, self.recognized_boxes, self.recognition_rate
        )
    }
}

/// The synchronous OCR pipeline.
pub struct OcrPipeline {
    config: PipelineConfig,
    runtime: Arc<dyn NpuRuntime>,
    doc_preprocessor: Option<DocPreprocessor>,
    detector: Option<TextDetector>,
    classifier: Option<TextLineClassifier>,
    recognizer: Option<TextRecognizer>,
    last_processed_image: Option<RgbImage>,
    initialized: bool,
}

impl OcrPipeline {
    /// Creates a pipeline; engines load in [`OcrPipeline::initialize`].
    pub fn new(runtime: Arc<dyn NpuRuntime>, config: PipelineConfig) -> Self {
        Self {
            config,
            runtime,
            doc_preprocessor: None,
            detector: None,
            classifier: None,
            recognizer: None,
            last_processed_image: None,
            initialized: false,
        }
    }

    /// Loads every configured engine. Idempotent: a second call on an
    /// initialized pipeline is a no-op.
    pub fn initialize(&mut self) -> OcrResult<()> {
        if self.initialized {
            warn!("pipeline already initialized");
            return Ok(());
        }

        self.config.validate()?;
        info!("initializing OCR pipeline");

        self.detector = Some(TextDetector::new(
            self.runtime.as_ref(),
            self.config.detector.clone(),
        )?);

        if self.config.doc_preprocessing.any_enabled() {
            self.doc_preprocessor = Some(DocPreprocessor::new(
                self.runtime.as_ref(),
                self.config.doc_preprocessing.clone(),
            )?);
            info!("document preprocessing enabled");
        }

        if self.config.use_classification {
            self.classifier = Some(TextLineClassifier::new(
                self.runtime.as_ref(),
                self.config.classifier.clone(),
            )?);
            info!("text line classification enabled");
        }

        self.recognizer = Some(TextRecognizer::new(
            self.runtime.as_ref(),
            self.config.recognizer.clone(),
        )?);

        self.initialized = true;
        info!("OCR pipeline initialized");
        Ok(())
    }

    /// Whether `initialize` has completed successfully.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The preprocessed image of the most recent `process` call.
    ///
    /// Result quads live in this image's coordinate space.
    pub fn last_processed_image(&self) -> Option<&RgbImage> {
        self.last_processed_image.as_ref()
    }

    /// Runs the full pipeline over one image.
    ///
    /// Per-image soft failures (detection inference errors, no text found)
    /// produce an empty result list with valid statistics. Calling before
    /// `initialize` is a usage error.
    pub fn process(
        &mut self,
        image: &RgbImage,
        task_config: Option<&PipelineTaskConfig>,
    ) -> OcrResult<(Vec<PipelineResult>, PipelineStats)> {
        if !self.initialized {
            return Err(OCRError::usage("process() called before initialize()"));
        }

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OCRError::invalid_input(format!(
                "cannot process a {width}x{height} image"
            )));
        }

        if let Some(task) = task_config {
            task.validate()?;
        }

        let total_start = Instant::now();
        let mut stats = PipelineStats::default();

        debug!(width, height, "starting OCR pipeline");

        // Stage 1: document preprocessing. Quads will be reported in the
        // preprocessed image's coordinate space.
        let processed = if let Some(ref mut preprocessor) = self.doc_preprocessor {
            let start = Instant::now();
            let result = preprocessor.process(
                image,
                task_config.and_then(|t| t.use_doc_orientation),
                task_config.and_then(|t| t.use_doc_unwarping),
            );
            stats.preprocessing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            debug!(
                orientation = result.orientation_applied,
                unwarp = result.unwarping_applied,
                ms = stats.preprocessing_time_ms,
                "document preprocessing finished"
            );
            result.image
        } else {
            image.clone()
        };
        self.last_processed_image = Some(processed.clone());

        // Stage 2: detection.
        let det_overrides = detection_overrides(task_config, &self.config.detector);
        let detector = self.detector.as_mut().ok_or_else(|| {
            OCRError::usage("detector missing on an initialized pipeline")
        })?;

        let det_start = Instant::now();
        let boxes = match detector.detect(&processed, det_overrides.as_ref()) {
            Ok(boxes) => boxes,
            Err(error) => {
                // Inference errors are fatal for this image only.
                warn!(%error, "detection failed; returning empty result");
                stats.detection_time_ms = det_start.elapsed().as_secs_f64() * 1000.0;
                stats.total_time_ms = total_start.elapsed().as_secs_f64() * 1000.0;
                stats.finish();
                return Ok((Vec::new(), stats));
            }
        };
        stats.detection_time_ms = det_start.elapsed().as_secs_f64() * 1000.0;
        stats.detected_boxes = boxes.len();

        info!(
            boxes = boxes.len(),
            ms = stats.detection_time_ms,
            "detection finished"
        );

        if boxes.is_empty() {
            stats.total_time_ms = total_start.elapsed().as_secs_f64() * 1000.0;
            stats.finish();
            return Ok((Vec::new(), stats));
        }

        // Stage 3: crop text regions. Degenerate quads drop their entry.
        let mut crops: Vec<RgbImage> = Vec::with_capacity(boxes.len());
        let mut crop_quads: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
        for bbox in &boxes {
            let quad = match bbox.as_quad() {
                Ok(quad) => quad,
                Err(error) => {
                    debug!(%error, "skipping non-quad detection");
                    continue;
                }
            };
            match get_rotate_crop_image(&processed, &quad) {
                Ok(crop) if crop.width() > 0 && crop.height() > 0 => {
                    crops.push(crop);
                    crop_quads.push(bbox.clone());
                }
                Ok(_) => debug!("skipping empty crop"),
                Err(error) => debug!(%error, "skipping failed crop"),
            }
        }

        // Stage 4: optional orientation classification.
        let cls_start = Instant::now();
        let use_classification = task_config
            .and_then(|t| t.use_textline_orientation)
            .unwrap_or(self.config.use_classification);
        if use_classification && let Some(ref mut classifier) = self.classifier {
            let cls_threshold = task_config.and_then(|t| t.cls_thresh);
            let outcomes = classifier.classify_batch(&crops);
            for (crop, (orientation, confidence)) in crops.iter_mut().zip(outcomes) {
                if classifier.needs_rotation(orientation, confidence, cls_threshold) {
                    *crop = imageops::rotate180(crop);
                    stats.rotated_boxes += 1;
                }
            }
        }
        stats.classification_time_ms = cls_start.elapsed().as_secs_f64() * 1000.0;

        // Stage 5: recognition.
        let recognizer = self.recognizer.as_mut().ok_or_else(|| {
            OCRError::usage("recognizer missing on an initialized pipeline")
        })?;
        let rec_threshold = task_config.and_then(|t| t.rec_score_thresh);

        let rec_start = Instant::now();
        let mut results = Vec::with_capacity(crops.len());
        for (quad, crop) in crop_quads.into_iter().zip(crops) {
            match recognizer.recognize(&crop, rec_threshold) {
                Ok(Some((text, confidence))) => {
                    let index = results.len();
                    results.push(PipelineResult {
                        quad,
                        text,
                        confidence,
                        index,
                    });
                }
                Ok(None) => {}
                Err(error) => {
                    debug!(%error, "recognition failed for one crop; dropping entry");
                }
            }
        }
        stats.recognition_time_ms = rec_start.elapsed().as_secs_f64() * 1000.0;
        stats.recognized_boxes = results.len();

        info!(
            recognized = results.len(),
            detected = stats.detected_boxes,
            ms = stats.recognition_time_ms,
            "recognition finished"
        );

        // Final assembly: reading order, then rewrite indices.
        if self.config.sort_results && !results.is_empty() {
            results.sort_by(|a, b| compare_reading_order(&a.quad, &b.quad));
            for (index, result) in results.iter_mut().enumerate() {
                result.index = index;
            }
        }

        stats.total_time_ms = total_start.elapsed().as_secs_f64() * 1000.0;
        stats.finish();

        recognizer.log_usage();

        Ok((results, stats))
    }

    /// Processes a batch of images sequentially, accumulating statistics.
    ///
    /// A failing image contributes an empty result list; the batch keeps
    /// going.
    pub fn process_batch(
        &mut self,
        images: &[RgbImage],
    ) -> OcrResult<(Vec<Vec<PipelineResult>>, PipelineStats)> {
        if !self.initialized {
            return Err(OCRError::usage("process_batch() called before initialize()"));
        }

        let mut all_results = Vec::with_capacity(images.len());
        let mut total = PipelineStats::default();

        for (i, image) in images.iter().enumerate() {
            match self.process(image, None) {
                Ok((results, stats)) => {
                    total.preprocessing_time_ms += stats.preprocessing_time_ms;
                    total.detection_time_ms += stats.detection_time_ms;
                    total.classification_time_ms += stats.classification_time_ms;
                    total.recognition_time_ms += stats.recognition_time_ms;
                    total.total_time_ms += stats.total_time_ms;
                    total.detected_boxes += stats.detected_boxes;
                    total.rotated_boxes += stats.rotated_boxes;
                    total.recognized_boxes += stats.recognized_boxes;
                    all_results.push(results);
                }
                Err(error) => {
                    warn!(image = i, %error, "batch image failed");
                    all_results.push(Vec::new());
                }
            }
        }

        total.finish();
        Ok((all_results, total))
    }
}

/// Builds the per-call detection overrides as a view over the shared
/// detector config, when any detection field is overridden.
fn detection_overrides(
    task_config: Option<&PipelineTaskConfig>,
    base: &crate::core::config::DetectorConfig,
) -> Option<DbPostProcessConfig> {
    let task = task_config?;
    if task.det_thresh.is_none()
        && task.det_box_thresh.is_none()
        && task.det_unclip_ratio.is_none()
    {
        return None;
    }
    Some(DbPostProcessConfig {
        thresh: task.det_thresh.unwrap_or(base.thresh),
        box_thresh: task.det_box_thresh.unwrap_or(base.box_thresh),
        unclip_ratio: task.det_unclip_ratio.unwrap_or(base.unclip_ratio),
    })
}

/// Serializes results as JSON to `path`.
pub fn save_results_json(results: &[PipelineResult], path: &Path) -> OcrResult<()> {
    #[derive(Serialize)]
    struct Document<'a> {
        results: &'a [PipelineResult],
        total_count: usize,
    }

    let document = Document {
        results,
        total_count: results.len(),
    };
    let json = serde_json::to_string_pretty(&document)
        .map_err(|e| OCRError::invalid_input(format!("failed to serialize results: {e}")))?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), count = results.len(), "results saved");
    Ok(())
}
