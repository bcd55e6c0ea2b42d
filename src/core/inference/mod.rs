//! NPU inference runtime contract.
//!
//! The pipeline does not own an inference runtime; it consumes one through
//! the [`NpuRuntime`] / [`NpuEngine`] traits. A runtime loads compiled model
//! artifacts into engines; an engine runs synchronous or asynchronous
//! inference over contiguous uint8 HWC BGR buffers.
//!
//! Normalization is compiled into the models: callers hand raw bytes to
//! [`NpuEngine::run`] and must not divide by 255 or subtract a mean.
//!
//! A runtime is assumed thread-safe across independent engines but not for
//! concurrent calls on one engine handle; engine methods take `&mut self` so
//! per-engine serialization is enforced by the borrow checker rather than by
//! convention.

pub mod mock;

use crate::core::errors::{OCRError, OcrResult};
use std::path::Path;

/// Identifier of an in-flight asynchronous inference job.
pub type JobId = u64;

/// A dense float32 output tensor with a known shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    /// Tensor dimensions, outermost first.
    pub shape: Vec<usize>,
    /// Row-major tensor contents.
    pub data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor, checking that the shape matches the data length.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> OcrResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(OCRError::invalid_input(format!(
                "tensor shape {:?} implies {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Number of elements in the tensor.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A loaded model ready for inference.
///
/// `input_shape` and `output_shape` describe the engine's compiled I/O:
/// input is `[height, width, channels]` uint8 HWC, output is the shape of
/// the primary float32 output tensor.
pub trait NpuEngine: Send {
    /// Declared input shape `[H, W, C]`.
    fn input_shape(&self) -> &[usize];

    /// Shape of the primary output tensor.
    fn output_shape(&self) -> &[usize];

    /// Runs synchronous inference over a contiguous uint8 HWC BGR buffer of
    /// the declared input size.
    fn run(&mut self, input: &[u8]) -> OcrResult<Vec<Tensor>>;

    /// Submits an asynchronous inference job.
    fn run_async(&mut self, input: &[u8]) -> OcrResult<JobId>;

    /// Waits for an asynchronous job and returns its output tensors.
    ///
    /// A job id may be waited on at most once; waiting on an unknown id is
    /// an error.
    fn wait(&mut self, job: JobId) -> OcrResult<Vec<Tensor>>;

    /// Byte length of the expected input buffer.
    fn input_len(&self) -> usize {
        self.input_shape().iter().product()
    }
}

/// Loads compiled model artifacts into engines.
pub trait NpuRuntime: Send + Sync {
    /// Loads the model at `model_path`.
    ///
    /// Fails with [`OCRError::ModelLoad`] when the artifact is missing or
    /// cannot be deserialized by the runtime.
    fn load(&self, model_path: &Path) -> OcrResult<Box<dyn NpuEngine>>;
}

impl std::fmt::Debug for dyn NpuEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NpuEngine")
            .field("input_shape", &self.input_shape())
            .field("output_shape", &self.output_shape())
            .finish()
    }
}

/// Checks that `input` matches the engine's declared input buffer size.
pub(crate) fn check_input_len(
    engine: &dyn NpuEngine,
    input: &[u8],
    model_name: &str,
) -> OcrResult<()> {
    let expected = engine.input_len();
    if input.len() != expected {
        return Err(OCRError::inference(
            model_name,
            format!(
                "input buffer has {} bytes, engine expects {} ({:?} HWC)",
                input.len(),
                expected,
                engine.input_shape()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_check() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
    }
}
