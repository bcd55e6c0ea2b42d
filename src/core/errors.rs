//! Core error types for the OCR pipeline.
//!
//! This module defines the error vocabulary used across all pipeline
//! components: the [`OCRError`] enum and the [`ProcessingStage`] enum that
//! locates a failure within the pipeline.

use thiserror::Error;

/// Convenience alias for results produced by this crate.
pub type OcrResult<T> = Result<T, OCRError>;

/// Enum representing the stages of processing that can fail with a
/// [`OCRError::Processing`] error.
///
/// Engine call failures carry their model name in [`OCRError::Inference`]
/// instead; this enum covers the CPU-side work around those calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Error occurred during image processing operations (cropping,
    /// warping, resizing).
    ImageProcessing,
    /// Error occurred while interpreting an engine's output tensors.
    PostProcessing,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::ImageProcessing => write!(f, "image processing"),
            ProcessingStage::PostProcessing => write!(f, "post-processing"),
        }
    }
}

/// Enum representing the errors that can occur in the OCR pipeline.
///
/// Initialization problems (missing models, dictionary mismatches) surface
/// through [`OCRError::ModelLoad`] and [`OCRError::ConfigError`]; data-driven
/// failures during processing use [`OCRError::Processing`] or
/// [`OCRError::Inference`] and are handled softly by the pipeline.
#[derive(Error, Debug)]
pub enum OCRError {
    /// Error occurred while loading an image.
    #[error("image load")]
    ImageLoad(#[from] image::ImageError),

    /// Error occurred during processing.
    #[error("{kind} failed: {context}")]
    Processing {
        /// The stage of processing where the error occurred.
        kind: ProcessingStage,
        /// Additional context about the error.
        context: String,
    },

    /// Error occurred during inference on an NPU engine.
    #[error("inference failed in model '{model_name}': {context}")]
    Inference {
        /// The name of the model where inference failed.
        model_name: String,
        /// Additional context about the inference error.
        context: String,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    ConfigError {
        /// A message describing the configuration error.
        message: String,
    },

    /// Error loading a model file, with context and suggestions.
    #[error("model load failed for '{model_path}': {reason}{suggestion}")]
    ModelLoad {
        /// Path to the model that failed to load.
        model_path: String,
        /// Short reason string.
        reason: String,
        /// Optional suggestion (prefixed with "; " when present).
        suggestion: String,
    },

    /// API misuse, e.g. calling `process()` before `initialize()`.
    #[error("usage: {message}")]
    Usage {
        /// A message describing the misuse.
        message: String,
    },

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

impl OCRError {
    /// Creates a processing error for a given stage.
    pub fn processing(kind: ProcessingStage, context: impl Into<String>) -> Self {
        Self::Processing {
            kind,
            context: context.into(),
        }
    }

    /// Creates an inference error for a named model.
    pub fn inference(model_name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Inference {
            model_name: model_name.into(),
            context: context.into(),
        }
    }

    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Creates a configuration error for invalid field values.
    pub fn invalid_field(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ConfigError {
            message: format!(
                "invalid value for field '{}': expected {}, got {}",
                field.into(),
                expected.into(),
                actual.into()
            ),
        }
    }

    /// Creates a model-load error without a recovery suggestion.
    pub fn model_load(model_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            model_path: model_path.into(),
            reason: reason.into(),
            suggestion: String::new(),
        }
    }

    /// Creates a model-load error with a suggestion for recovery.
    pub fn model_load_with_suggestion(
        model_path: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ModelLoad {
            model_path: model_path.into(),
            reason: reason.into(),
            suggestion: format!("; {}", suggestion.into()),
        }
    }

    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }
}
