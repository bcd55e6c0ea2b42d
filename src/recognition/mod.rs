//! Text recognition.
//!
//! CRNN-style recognizer over a family of six engines indexed by
//! aspect-ratio bucket. A crop routes to the smallest bucket that fits its
//! width/height ratio, is resized to the model height and right-padded to
//! the bucket width, and the CTC output is greedily decoded against the
//! shared dictionary.

pub mod ctc;

pub use ctc::{CtcLabelDecode, load_dictionary};

use crate::core::config::RecognizerConfig;
use crate::core::errors::{OCRError, OcrResult, ProcessingStage};
use crate::core::inference::{NpuEngine, NpuRuntime, Tensor};
use crate::processors::resize::{aspect_bucket, pad_and_resize_keep_ratio, to_bgr_hwc};
use image::RgbImage;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Aspect-ratio-routed text recognizer.
#[derive(Debug)]
pub struct TextRecognizer {
    config: RecognizerConfig,
    engines: BTreeMap<u32, Box<dyn NpuEngine>>,
    decoder: CtcLabelDecode,
    usage: BTreeMap<u32, u64>,
}

impl TextRecognizer {
    /// Loads the dictionary and every bucket engine.
    ///
    /// Fails when any model is missing or when an engine's output channel
    /// count disagrees with the dictionary size (after the blank token is
    /// inserted at index 0).
    pub fn new(runtime: &dyn NpuRuntime, config: RecognizerConfig) -> OcrResult<Self> {
        config.validate()?;

        let characters = load_dictionary(&config.dict_path, config.use_space_char)?;
        let decoder = CtcLabelDecode::new(Arc::clone(&characters));

        let mut engines = BTreeMap::new();
        let mut usage = BTreeMap::new();
        for (bucket, path) in &config.model_paths {
            let engine = runtime.load(path)?;

            let expected_input = [
                config.input_height as usize,
                (config.input_height * bucket) as usize,
                3,
            ];
            if engine.input_shape() != expected_input {
                return Err(OCRError::model_load(
                    path.display().to_string(),
                    format!(
                        "bucket {bucket} expects {expected_input:?} HWC input, engine declares {:?}",
                        engine.input_shape()
                    ),
                ));
            }

            let channels = engine.output_shape().last().copied().unwrap_or(0);
            if channels != characters.len() {
                return Err(OCRError::config(format!(
                    "dictionary size mismatch for bucket {bucket}: model emits {channels} classes, \
                     dictionary holds {} tokens (including blank)",
                    characters.len()
                )));
            }

            engines.insert(*bucket, engine);
            usage.insert(*bucket, 0);
        }

        Ok(Self {
            config,
            engines,
            decoder,
            usage,
        })
    }

    /// Recognizes one rectified crop.
    ///
    /// Returns `Ok(None)` when the decoded text is empty or its confidence
    /// falls below the (possibly overridden) threshold; those entries are
    /// dropped rather than reported.
    pub fn recognize(
        &mut self,
        crop: &RgbImage,
        conf_threshold: Option<f32>,
    ) -> OcrResult<Option<(String, f32)>> {
        let (w, h) = crop.dimensions();
        if w == 0 || h == 0 {
            return Err(OCRError::invalid_input("cannot recognize an empty crop"));
        }

        let ratio = w as f32 / h as f32;
        let bucket = aspect_bucket(ratio);
        let input = pad_and_resize_keep_ratio(crop, self.config.input_height, bucket)?;
        let buffer = to_bgr_hwc(&input);

        let engine = self
            .engines
            .get_mut(&bucket)
            .ok_or_else(|| OCRError::config(format!("no engine for bucket {bucket}")))?;
        let model_name = format!("rec_{bucket}");

        let tensors = engine.run(&buffer).map_err(|e| {
            OCRError::inference(&model_name, format!("recognition inference failed: {e}"))
        })?;
        let pred = sequence_view(&tensors, &model_name)?;

        *self.usage.entry(bucket).or_insert(0) += 1;

        let (text, confidence) = self.decoder.decode(&pred.view());

        let threshold = conf_threshold.unwrap_or(self.config.conf_threshold);
        if text.is_empty() || confidence < threshold {
            return Ok(None);
        }
        Ok(Some((text, confidence)))
    }

    /// Per-bucket engine usage counts since initialization.
    pub fn usage_counts(&self) -> &BTreeMap<u32, u64> {
        &self.usage
    }

    /// Traces per-bucket usage at debug level.
    pub fn log_usage(&self) {
        for (bucket, count) in &self.usage {
            debug!(bucket, count, "recognition engine usage");
        }
    }
}

/// Interprets the first output tensor as a `[T, C]` CTC sequence.
fn sequence_view(tensors: &[Tensor], model_name: &str) -> OcrResult<Array2<f32>> {
    let tensor = tensors.first().ok_or_else(|| {
        OCRError::processing(
            ProcessingStage::PostProcessing,
            format!("{model_name} returned no output tensors"),
        )
    })?;

    let (t, c) = match tensor.shape.as_slice() {
        [t, c] => (*t, *c),
        [1, t, c] => (*t, *c),
        other => {
            return Err(OCRError::processing(
                ProcessingStage::PostProcessing,
                format!("unexpected CTC output shape {other:?} from {model_name}"),
            ));
        }
    };

    Array2::from_shape_vec((t, c), tensor.data.clone()).map_err(|e| {
        OCRError::processing(
            ProcessingStage::PostProcessing,
            format!("CTC reshape failed for {model_name}: {e}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::REC_ASPECT_BUCKETS;
    use crate::core::inference::mock::MockRuntime;
    use std::path::PathBuf;

    const HEIGHT: u32 = 48;

    fn write_dict(name: &str, tokens: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join("npu_ocr_rec_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, tokens.join("\n")).unwrap();
        path
    }

    /// Registers six recognition engines that always emit "hi" (classes 1
    /// then 2) over 8 timesteps.
    fn recognition_runtime(classes: usize) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        for bucket in REC_ASPECT_BUCKETS {
            let width = (HEIGHT * bucket) as usize;
            runtime = runtime.register(
                format!("models/rec_{bucket}.bin"),
                vec![HEIGHT as usize, width, 3],
                vec![1, 8, classes],
                move |_input| {
                    let mut data = vec![0.01f32; 8 * classes];
                    // h at t=1, i at t=4, blanks elsewhere.
                    for t in 0..8 {
                        let idx = match t {
                            1 => 1,
                            4 => 2,
                            _ => 0,
                        };
                        data[t * classes + idx] = 0.9;
                    }
                    vec![Tensor::new(vec![1, 8, classes], data).unwrap()]
                },
            );
        }
        runtime
    }

    fn recognizer_config(dict: PathBuf) -> RecognizerConfig {
        RecognizerConfig {
            dict_path: dict,
            model_paths: REC_ASPECT_BUCKETS
                .into_iter()
                .map(|b| (b, PathBuf::from(format!("models/rec_{b}.bin"))))
                .collect(),
            ..RecognizerConfig::default()
        }
    }

    #[test]
    fn test_recognize_routes_and_decodes() {
        let dict = write_dict("dict_hi.txt", &["h", "i"]);
        let runtime = recognition_runtime(3);
        let mut recognizer = TextRecognizer::new(&runtime, recognizer_config(dict)).unwrap();

        // 200x40 crop: ratio 5 routes to bucket 5.
        let crop = RgbImage::new(200, 40);
        let result = recognizer.recognize(&crop, None).unwrap();
        let (text, confidence) = result.expect("should recognize");
        assert_eq!(text, "hi");
        assert!((confidence - 0.9).abs() < 1e-5);

        assert_eq!(recognizer.usage_counts()[&5], 1);
        assert_eq!(recognizer.usage_counts()[&3], 0);
    }

    #[test]
    fn test_recognize_threshold_override_drops_result() {
        let dict = write_dict("dict_hi2.txt", &["h", "i"]);
        let runtime = recognition_runtime(3);
        let mut recognizer = TextRecognizer::new(&runtime, recognizer_config(dict)).unwrap();

        let crop = RgbImage::new(120, 40);
        assert!(recognizer.recognize(&crop, Some(0.95)).unwrap().is_none());
        assert!(recognizer.recognize(&crop, Some(0.5)).unwrap().is_some());
    }

    #[test]
    fn test_overwide_crop_routes_to_widest_bucket() {
        let dict = write_dict("dict_hi3.txt", &["h", "i"]);
        let runtime = recognition_runtime(3);
        let mut recognizer = TextRecognizer::new(&runtime, recognizer_config(dict)).unwrap();

        // Ratio 60 exceeds every bucket; it must clamp to 35.
        let crop = RgbImage::new(2400, 40);
        recognizer.recognize(&crop, None).unwrap();
        assert_eq!(recognizer.usage_counts()[&35], 1);
    }

    #[test]
    fn test_dictionary_size_mismatch_is_fatal() {
        // Dictionary yields 4 classes (blank + 3) but engines emit 3.
        let dict = write_dict("dict_bad.txt", &["a", "b", "c"]);
        let runtime = recognition_runtime(3);
        let err = TextRecognizer::new(&runtime, recognizer_config(dict)).unwrap_err();
        assert!(err.to_string().contains("dictionary size mismatch"));
    }
}
