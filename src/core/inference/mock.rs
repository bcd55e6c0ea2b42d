//! In-process mock NPU runtime.
//!
//! Implements the [`NpuRuntime`] contract with closure-backed engines so the
//! pipeline can be exercised end-to-end without accelerator hardware. Used
//! by the integration tests; also handy for wiring demos.

use super::{JobId, NpuEngine, NpuRuntime, Tensor};
use crate::core::errors::{OCRError, OcrResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type InferFn = dyn Fn(&[u8]) -> Vec<Tensor> + Send + Sync;

/// A registered mock model: declared I/O shapes plus the inference closure.
#[derive(Clone)]
struct MockModel {
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    infer: Arc<InferFn>,
}

/// Mock runtime mapping model paths to registered [`MockModel`]s.
///
/// `load` fails for unregistered paths the same way a real runtime fails for
/// missing artifacts, so initialization error paths stay testable.
#[derive(Default, Clone)]
pub struct MockRuntime {
    models: HashMap<PathBuf, MockModel>,
}

impl MockRuntime {
    /// Creates an empty mock runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model under `path`.
    ///
    /// `input_shape` is `[H, W, C]`; `output_shape` is the shape of the
    /// primary output tensor; `infer` maps the raw input buffer to output
    /// tensors.
    pub fn register(
        mut self,
        path: impl Into<PathBuf>,
        input_shape: Vec<usize>,
        output_shape: Vec<usize>,
        infer: impl Fn(&[u8]) -> Vec<Tensor> + Send + Sync + 'static,
    ) -> Self {
        self.models.insert(
            path.into(),
            MockModel {
                input_shape,
                output_shape,
                infer: Arc::new(infer),
            },
        );
        self
    }
}

impl NpuRuntime for MockRuntime {
    fn load(&self, model_path: &Path) -> OcrResult<Box<dyn NpuEngine>> {
        let model = self.models.get(model_path).ok_or_else(|| {
            OCRError::model_load_with_suggestion(
                model_path.display().to_string(),
                "no such model registered",
                "register the model path on the mock runtime",
            )
        })?;
        Ok(Box::new(MockEngine {
            model: model.clone(),
            pending: HashMap::new(),
            next_job: 0,
        }))
    }
}

/// Engine returned by [`MockRuntime::load`].
///
/// The asynchronous form computes eagerly on submit and parks the tensors
/// until `wait` collects them, which preserves the submit/wait protocol
/// without real concurrency.
struct MockEngine {
    model: MockModel,
    pending: HashMap<JobId, Vec<Tensor>>,
    next_job: JobId,
}

impl NpuEngine for MockEngine {
    fn input_shape(&self) -> &[usize] {
        &self.model.input_shape
    }

    fn output_shape(&self) -> &[usize] {
        &self.model.output_shape
    }

    fn run(&mut self, input: &[u8]) -> OcrResult<Vec<Tensor>> {
        super::check_input_len(self, input, "mock")?;
        Ok((self.model.infer)(input))
    }

    fn run_async(&mut self, input: &[u8]) -> OcrResult<JobId> {
        let tensors = self.run(input)?;
        let job = self.next_job;
        self.next_job += 1;
        self.pending.insert(job, tensors);
        Ok(job)
    }

    fn wait(&mut self, job: JobId) -> OcrResult<Vec<Tensor>> {
        self.pending
            .remove(&job)
            .ok_or_else(|| OCRError::inference("mock", format!("unknown job id {job}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> MockRuntime {
        MockRuntime::new().register("models/identity.bin", vec![2, 2, 3], vec![1, 4], |input| {
            let sum: u32 = input.iter().map(|&b| b as u32).sum();
            vec![Tensor::new(vec![1, 4], vec![sum as f32, 0.0, 0.0, 0.0]).unwrap()]
        })
    }

    #[test]
    fn test_load_unregistered_path_fails() {
        let err = runtime().load(Path::new("models/missing.bin")).unwrap_err();
        assert!(matches!(err, OCRError::ModelLoad { .. }));
    }

    #[test]
    fn test_run_checks_input_len() {
        let mut engine = runtime().load(Path::new("models/identity.bin")).unwrap();
        assert!(engine.run(&[0u8; 5]).is_err());
        let out = engine.run(&[1u8; 12]).unwrap();
        assert_eq!(out[0].data[0], 12.0);
    }

    #[test]
    fn test_async_submit_wait_roundtrip() {
        let mut engine = runtime().load(Path::new("models/identity.bin")).unwrap();
        let a = engine.run_async(&[1u8; 12]).unwrap();
        let b = engine.run_async(&[2u8; 12]).unwrap();
        assert_ne!(a, b);

        // Jobs can be collected out of submission order, exactly once.
        assert_eq!(engine.wait(b).unwrap()[0].data[0], 24.0);
        assert_eq!(engine.wait(a).unwrap()[0].data[0], 12.0);
        assert!(engine.wait(a).is_err());
    }
}
