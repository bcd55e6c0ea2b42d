//! Configuration types for the OCR pipeline components.
//!
//! Engine-bound configuration (model paths, bucket set) is immutable after
//! `initialize()`; request-level overrides travel as a plain value
//! ([`PipelineTaskConfig`]) threaded through `process()`, so shared component
//! configs are never mutated at request time.

use crate::core::constants::*;
use crate::core::errors::{OCRError, OcrResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn validate_unit_range(value: f32, field: &str) -> OcrResult<()> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(OCRError::invalid_field(
            field,
            "value in [0, 1]",
            format!("{value}"),
        ));
    }
    Ok(())
}

fn validate_model_path(path: &std::path::Path, field: &str) -> OcrResult<()> {
    if path.as_os_str().is_empty() {
        return Err(OCRError::invalid_field(field, "non-empty path", "\"\""));
    }
    Ok(())
}

/// Configuration for the DBNet-style text detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Threshold for binarizing the probability map.
    pub thresh: f32,
    /// Threshold for filtering boxes by their mean probability.
    pub box_thresh: f32,
    /// Ratio for unclipping (expanding) detected boxes.
    pub unclip_ratio: f32,
    /// Maximum number of candidate contours considered per image.
    pub max_candidates: usize,
    /// Route to the 640 model when `max(H, W)` is below this, 960 otherwise.
    pub size_threshold: u32,
    /// Path to the model compiled for 640x640 input.
    pub model_640_path: PathBuf,
    /// Path to the model compiled for 960x960 input.
    pub model_960_path: PathBuf,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            thresh: DEFAULT_DET_THRESH,
            box_thresh: DEFAULT_DET_BOX_THRESH,
            unclip_ratio: DEFAULT_DET_UNCLIP_RATIO,
            max_candidates: DEFAULT_DET_MAX_CANDIDATES,
            size_threshold: DEFAULT_DET_SIZE_THRESHOLD,
            model_640_path: PathBuf::new(),
            model_960_path: PathBuf::new(),
        }
    }
}

impl DetectorConfig {
    /// Validates threshold ranges and model paths.
    pub fn validate(&self) -> OcrResult<()> {
        validate_unit_range(self.thresh, "thresh")?;
        validate_unit_range(self.box_thresh, "box_thresh")?;
        if !(1.0..=3.0).contains(&self.unclip_ratio) {
            return Err(OCRError::invalid_field(
                "unclip_ratio",
                "value in [1.0, 3.0]",
                format!("{}", self.unclip_ratio),
            ));
        }
        validate_model_path(&self.model_640_path, "model_640_path")?;
        validate_model_path(&self.model_960_path, "model_960_path")?;
        Ok(())
    }
}

/// Configuration for the aspect-ratio-routed recognition model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Confidence threshold below which results are dropped.
    pub conf_threshold: f32,
    /// Model input height.
    pub input_height: u32,
    /// Model path per aspect-ratio bucket; every bucket in
    /// [`REC_ASPECT_BUCKETS`] must be present.
    pub model_paths: Vec<(u32, PathBuf)>,
    /// Path to the UTF-8, newline-separated token dictionary.
    pub dict_path: PathBuf,
    /// Appends a space token to the dictionary when enabled.
    pub use_space_char: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            conf_threshold: DEFAULT_REC_CONF_THRESHOLD,
            input_height: DEFAULT_REC_INPUT_HEIGHT,
            model_paths: Vec::new(),
            dict_path: PathBuf::new(),
            use_space_char: false,
        }
    }
}

impl RecognizerConfig {
    /// Validates thresholds, the bucket set, and the dictionary path.
    pub fn validate(&self) -> OcrResult<()> {
        validate_unit_range(self.conf_threshold, "conf_threshold")?;
        if self.input_height == 0 {
            return Err(OCRError::invalid_field("input_height", "positive", "0"));
        }
        validate_model_path(&self.dict_path, "dict_path")?;
        for bucket in REC_ASPECT_BUCKETS {
            let entry = self.model_paths.iter().find(|(b, _)| *b == bucket);
            match entry {
                Some((_, path)) => {
                    validate_model_path(path, &format!("model_paths[{bucket}]"))?;
                }
                None => {
                    return Err(OCRError::config(format!(
                        "missing recognition model for aspect bucket {bucket}"
                    )));
                }
            }
        }
        for (bucket, _) in &self.model_paths {
            if !REC_ASPECT_BUCKETS.contains(bucket) {
                return Err(OCRError::invalid_field(
                    "model_paths",
                    format!("bucket in {REC_ASPECT_BUCKETS:?}"),
                    format!("{bucket}"),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration for the 0/180 text line orientation classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Path to the classifier model.
    pub model_path: PathBuf,
    /// Confidence above which a "180" label rotates the crop.
    pub threshold: f32,
    /// Model input width.
    pub input_width: u32,
    /// Model input height.
    pub input_height: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            threshold: DEFAULT_CLS_THRESHOLD,
            input_width: DEFAULT_CLS_INPUT_WIDTH,
            input_height: DEFAULT_CLS_INPUT_HEIGHT,
        }
    }
}

impl ClassifierConfig {
    /// Validates the threshold range and model path.
    pub fn validate(&self) -> OcrResult<()> {
        validate_unit_range(self.threshold, "threshold")?;
        validate_model_path(&self.model_path, "model_path")?;
        if self.input_width == 0 || self.input_height == 0 {
            return Err(OCRError::invalid_field(
                "input size",
                "positive dimensions",
                format!("{}x{}", self.input_width, self.input_height),
            ));
        }
        Ok(())
    }
}

/// Configuration for the document orientation classifier (0/90/180/270).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrientationConfig {
    /// Path to the 4-class orientation model.
    pub model_path: PathBuf,
    /// Minimum top-class probability for applying a rotation.
    pub confidence_threshold: f32,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            confidence_threshold: DEFAULT_ORIENTATION_CONF_THRESHOLD,
        }
    }
}

/// Configuration for the UVDoc unwarping model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UvDocConfig {
    /// Path to the UVDoc model.
    pub model_path: PathBuf,
    /// Fixed model input height.
    pub input_height: u32,
    /// Fixed model input width.
    pub input_width: u32,
    /// Corner-aligned sampling for field upsampling and remapping.
    pub align_corners: bool,
}

impl Default for UvDocConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            input_height: DEFAULT_UVDOC_INPUT_HEIGHT,
            input_width: DEFAULT_UVDOC_INPUT_WIDTH,
            align_corners: true,
        }
    }
}

/// Configuration for the document preprocessor.
///
/// Both substages are independently toggleable; a disabled substage needs no
/// model path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocPreprocConfig {
    /// Enables the orientation classification substage.
    pub use_orientation: bool,
    /// Orientation classifier settings.
    pub orientation: OrientationConfig,
    /// Enables the unwarping substage.
    pub use_unwarping: bool,
    /// UVDoc settings.
    pub uvdoc: UvDocConfig,
}

impl DocPreprocConfig {
    /// Validates the enabled substages.
    pub fn validate(&self) -> OcrResult<()> {
        if self.use_orientation {
            validate_unit_range(
                self.orientation.confidence_threshold,
                "orientation.confidence_threshold",
            )?;
            validate_model_path(&self.orientation.model_path, "orientation.model_path")?;
        }
        if self.use_unwarping {
            validate_model_path(&self.uvdoc.model_path, "uvdoc.model_path")?;
            if self.uvdoc.input_width == 0 || self.uvdoc.input_height == 0 {
                return Err(OCRError::invalid_field(
                    "uvdoc input size",
                    "positive dimensions",
                    format!("{}x{}", self.uvdoc.input_width, self.uvdoc.input_height),
                ));
            }
        }
        Ok(())
    }

    /// Returns true when at least one substage is enabled.
    pub fn any_enabled(&self) -> bool {
        self.use_orientation || self.use_unwarping
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Text detector settings.
    pub detector: DetectorConfig,
    /// Text recognizer settings.
    pub recognizer: RecognizerConfig,
    /// Text line classifier settings; only read when classification is on.
    pub classifier: ClassifierConfig,
    /// Enables the text line orientation classification stage.
    pub use_classification: bool,
    /// Document preprocessing settings.
    pub doc_preprocessing: DocPreprocConfig,
    /// Sorts assembled results into reading order.
    pub sort_results: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            recognizer: RecognizerConfig::default(),
            classifier: ClassifierConfig::default(),
            use_classification: false,
            doc_preprocessing: DocPreprocConfig::default(),
            sort_results: true,
        }
    }
}

impl PipelineConfig {
    /// Validates every component configuration that will be initialized.
    pub fn validate(&self) -> OcrResult<()> {
        self.detector.validate()?;
        self.recognizer.validate()?;
        if self.use_classification {
            self.classifier.validate()?;
        }
        self.doc_preprocessing.validate()?;
        Ok(())
    }
}

/// Per-submission overrides applied on top of the shared component configs.
///
/// Carries only thresholds and stage toggles; model paths and the bucket set
/// can never change per task. Every field defaults to "inherit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineTaskConfig {
    /// Overrides the document orientation substage toggle.
    pub use_doc_orientation: Option<bool>,
    /// Overrides the document unwarping substage toggle.
    pub use_doc_unwarping: Option<bool>,
    /// Overrides the text line orientation stage toggle.
    pub use_textline_orientation: Option<bool>,
    /// Overrides the detection binarization threshold.
    pub det_thresh: Option<f32>,
    /// Overrides the detection box confidence threshold.
    pub det_box_thresh: Option<f32>,
    /// Overrides the detection unclip ratio.
    pub det_unclip_ratio: Option<f32>,
    /// Overrides the recognition confidence threshold.
    pub rec_score_thresh: Option<f32>,
    /// Overrides the classifier rotation threshold.
    pub cls_thresh: Option<f32>,
}

impl PipelineTaskConfig {
    /// Validates any overridden threshold ranges.
    pub fn validate(&self) -> OcrResult<()> {
        if let Some(v) = self.det_thresh {
            validate_unit_range(v, "det_thresh")?;
        }
        if let Some(v) = self.det_box_thresh {
            validate_unit_range(v, "det_box_thresh")?;
        }
        if let Some(v) = self.det_unclip_ratio
            && !(1.0..=3.0).contains(&v)
        {
            return Err(OCRError::invalid_field(
                "det_unclip_ratio",
                "value in [1.0, 3.0]",
                format!("{v}"),
            ));
        }
        if let Some(v) = self.rec_score_thresh {
            validate_unit_range(v, "rec_score_thresh")?;
        }
        if let Some(v) = self.cls_thresh {
            validate_unit_range(v, "cls_thresh")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector_config() -> DetectorConfig {
        DetectorConfig {
            model_640_path: PathBuf::from("models/det_640.bin"),
            model_960_path: PathBuf::from("models/det_960.bin"),
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn test_detector_config_defaults_valid() {
        assert!(detector_config().validate().is_ok());
    }

    #[test]
    fn test_detector_config_rejects_out_of_range() {
        let mut config = detector_config();
        config.box_thresh = 1.5;
        assert!(config.validate().is_err());

        let mut config = detector_config();
        config.unclip_ratio = 0.5;
        assert!(config.validate().is_err());

        let mut config = detector_config();
        config.model_960_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recognizer_config_requires_all_buckets() {
        let mut config = RecognizerConfig {
            dict_path: PathBuf::from("models/dict.txt"),
            ..RecognizerConfig::default()
        };
        for bucket in REC_ASPECT_BUCKETS {
            config
                .model_paths
                .push((bucket, PathBuf::from(format!("models/rec_{bucket}.bin"))));
        }
        assert!(config.validate().is_ok());

        config.model_paths.retain(|(b, _)| *b != 15);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("15"));
    }

    #[test]
    fn test_task_config_validation() {
        let config = PipelineTaskConfig {
            det_box_thresh: Some(0.4),
            det_unclip_ratio: Some(2.0),
            ..PipelineTaskConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = PipelineTaskConfig {
            det_unclip_ratio: Some(5.0),
            ..PipelineTaskConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
