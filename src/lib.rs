//! # npu-ocr
//!
//! A multi-stage OCR inference pipeline for NPU-backed runtimes.
//!
//! Given a raster image, the pipeline locates text regions, normalizes
//! their orientation, transcribes their contents, and returns an ordered
//! list of `(quad, text, confidence)` results. The stages:
//!
//! 1. Document preprocessing (orientation correction + unwarping)
//! 2. Text detection (DBNet-style, with 640/960 model routing)
//! 3. Text line orientation classification (0/180)
//! 4. Text recognition (CRNN + CTC over an aspect-ratio-routed model family)
//! 5. Result assembly in reading order
//!
//! The accelerator itself is abstracted behind [`core::inference::NpuRuntime`];
//! engines consume uint8 HWC BGR buffers with normalization compiled into
//! the models. An in-process mock runtime ships for tests and demos.
//!
//! ## Modules
//!
//! * [`core`] - configuration, errors, and the inference runtime contract
//! * [`processors`] - geometry kit, resize/pad operations, box ordering
//! * [`preprocess`] - document orientation and unwarping
//! * [`detection`] - text detection and DB post-processing
//! * [`classification`] - text line orientation classification
//! * [`recognition`] - CRNN recognition and CTC decoding
//! * [`pipeline`] - the synchronous pipeline, its async wrapper, and
//!   correlated result delivery
//! * [`utils`] - perspective cropping, image loading, tracing setup

pub mod classification;
pub mod core;
pub mod detection;
pub mod pipeline;
pub mod preprocess;
pub mod processors;
pub mod recognition;
pub mod utils;

/// Prelude module for convenient imports.
pub mod prelude {
    // Error handling
    pub use crate::core::errors::{OCRError, OcrResult};

    // Configuration
    pub use crate::core::config::{
        ClassifierConfig, DetectorConfig, DocPreprocConfig, OrientationConfig, PipelineConfig,
        PipelineTaskConfig, RecognizerConfig, UvDocConfig,
    };

    // Runtime contract
    pub use crate::core::inference::{NpuEngine, NpuRuntime, Tensor, mock::MockRuntime};

    // Geometry types
    pub use crate::processors::{BoundingBox, MinAreaRect, Point};

    // Pipelines
    pub use crate::pipeline::{
        AsyncOcrPipeline, AsyncTaskResult, OcrPipeline, PipelineResult, PipelineStats,
        ResultCollector, save_results_json,
    };

    // Utilities
    pub use crate::utils::{init_tracing, load_image};
}
