//! The core module of the OCR pipeline.
//!
//! This module contains the fundamental components shared by every stage:
//! - Configuration management and per-task overrides
//! - Constants used throughout the pipeline
//! - Error handling
//! - The NPU inference runtime contract (and its in-process mock)
//!
//! It also re-exports commonly used types for convenience.

pub mod config;
pub mod constants;
pub mod errors;
pub mod inference;

pub use config::{
    ClassifierConfig, DetectorConfig, DocPreprocConfig, OrientationConfig, PipelineConfig,
    PipelineTaskConfig, RecognizerConfig, UvDocConfig,
};
pub use constants::*;
pub use errors::{OCRError, OcrResult, ProcessingStage};
pub use inference::{JobId, NpuEngine, NpuRuntime, Tensor, mock::MockRuntime};
