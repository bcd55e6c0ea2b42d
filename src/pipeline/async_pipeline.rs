//! Asynchronous task/result pipeline.
//!
//! Wraps the synchronous pipeline with a single worker thread and two
//! bounded FIFO queues so a producer can submit tasks faster than any
//! single stage processes them, overlapping NPU inference with CPU-side
//! work on the caller's side.
//!
//! Ordering: with the single worker, results leave the output queue in the
//! order tasks were dequeued, which equals submission order for a single
//! producer. Multiple producers interleave and must correlate by task id
//! (see [`super::collector::ResultCollector`]).

use crate::core::config::PipelineTaskConfig;
use crate::core::constants::DEFAULT_QUEUE_CAPACITY;
use crate::core::errors::{OCRError, OcrResult};
use crate::pipeline::{OcrPipeline, PipelineResult, PipelineStats};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A unit of work submitted to the async pipeline.
#[derive(Debug)]
pub struct AsyncTask {
    /// Caller-chosen identifier, echoed back with the result.
    pub task_id: i64,
    /// The image to process.
    pub image: RgbImage,
    /// Optional per-task overrides.
    pub task_config: Option<PipelineTaskConfig>,
}

/// A completed task.
#[derive(Debug, Clone)]
pub struct AsyncTaskResult {
    /// The identifier passed to `push_task`.
    pub task_id: i64,
    /// Recognized regions; empty when the image failed or held no text.
    pub results: Vec<PipelineResult>,
    /// Per-stage statistics.
    pub stats: PipelineStats,
    /// The preprocessed image the result quads refer to.
    pub processed_image: Option<RgbImage>,
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Outcome of a blocking pop.
pub(crate) enum PopOutcome<T> {
    /// An item was dequeued.
    Item(T),
    /// The wait deadline passed with the queue still empty.
    TimedOut,
    /// The queue is closed and drained.
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A capacity-bounded FIFO guarded by a mutex and condition variables.
pub(crate) struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Non-blocking push; hands the item back when the queue is full or
    /// closed.
    pub(crate) fn try_push(&self, item: T) -> Result<(), T> {
        let mut state = lock_ignore_poison(&self.state);
        if state.closed || state.items.len() >= self.capacity {
            return Err(item);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocking push; waits for space and fails only when the queue closes.
    pub(crate) fn push_wait(&self, item: T) -> Result<(), T> {
        let mut state = lock_ignore_poison(&self.state);
        while !state.closed && state.items.len() >= self.capacity {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking pop.
    pub(crate) fn try_pop(&self) -> Option<T> {
        let mut state = lock_ignore_poison(&self.state);
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Pops with a bounded wait. A closed queue still drains its backlog
    /// before reporting `Closed`.
    pub(crate) fn pop_wait(&self, timeout: Duration) -> PopOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut state = lock_ignore_poison(&self.state);
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return PopOutcome::Item(item);
            }
            if state.closed {
                return PopOutcome::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return PopOutcome::TimedOut;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }
    }

    /// Closes the queue and wakes every waiter. Items already queued stay
    /// poppable.
    pub(crate) fn close(&self) {
        let mut state = lock_ignore_poison(&self.state);
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        lock_ignore_poison(&self.state).items.len()
    }
}

/// Cloneable handle for draining the async pipeline's output queue.
///
/// This is what a result collector consumes; it stays usable while the
/// owning pipeline is stopped.
#[derive(Clone)]
pub struct ResultSource {
    queue: Arc<BoundedQueue<AsyncTaskResult>>,
    worker_alive: Arc<AtomicBool>,
}

impl ResultSource {
    /// Non-blocking pop of one completed task.
    pub fn try_next(&self) -> Option<AsyncTaskResult> {
        self.queue.try_pop()
    }

    /// Whether more results may still arrive.
    pub fn is_live(&self) -> bool {
        self.worker_alive.load(Ordering::Acquire) || self.queue.len() > 0
    }
}

/// The asynchronous OCR pipeline.
///
/// One worker thread owns the wrapped [`OcrPipeline`] (and therefore every
/// engine handle), which serializes all NPU calls. Producers feed the
/// bounded input queue with [`AsyncOcrPipeline::push_task`]; consumers
/// drain the bounded output queue with [`AsyncOcrPipeline::get_result`].
pub struct AsyncOcrPipeline {
    input: Arc<BoundedQueue<AsyncTask>>,
    output: Arc<BoundedQueue<AsyncTaskResult>>,
    worker: Option<JoinHandle<()>>,
    worker_alive: Arc<AtomicBool>,
    pipeline: Option<OcrPipeline>,
}

// Safety: `pipeline` is only ever touched from `start`/`stop`/`Drop`, which
// require `&mut self`, and from the worker thread it was moved into by
// `take()`; no method taking `&self` reaches it. The other fields are all
// `Sync`, so sharing `&AsyncOcrPipeline` across threads is sound even though
// `OcrPipeline` (via `Box<dyn NpuEngine>`) is only `Send`.
unsafe impl Sync for AsyncOcrPipeline {}

impl AsyncOcrPipeline {
    /// Wraps a pipeline with default queue capacities.
    pub fn new(pipeline: OcrPipeline) -> Self {
        Self::with_capacity(pipeline, DEFAULT_QUEUE_CAPACITY)
    }

    /// Wraps a pipeline with the given input/output queue capacity.
    pub fn with_capacity(pipeline: OcrPipeline, capacity: usize) -> Self {
        Self {
            input: Arc::new(BoundedQueue::new(capacity)),
            output: Arc::new(BoundedQueue::new(capacity)),
            worker: None,
            worker_alive: Arc::new(AtomicBool::new(false)),
            pipeline: Some(pipeline),
        }
    }

    /// Spawns the worker thread.
    ///
    /// Initializes the wrapped pipeline first when that has not happened
    /// yet. Starting twice, or after `stop`, is a usage error.
    pub fn start(&mut self) -> OcrResult<()> {
        if self.worker.is_some() {
            return Err(OCRError::usage("async pipeline already started"));
        }
        let mut pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| OCRError::usage("async pipeline cannot be restarted after stop()"))?;
        if !pipeline.is_initialized()
            && let Err(error) = pipeline.initialize()
        {
            self.pipeline = Some(pipeline);
            return Err(error);
        }

        let input = Arc::clone(&self.input);
        let output = Arc::clone(&self.output);
        let worker_alive = Arc::clone(&self.worker_alive);
        worker_alive.store(true, Ordering::Release);

        self.worker = Some(std::thread::spawn(move || {
            worker_loop(pipeline, input, output, worker_alive);
        }));

        info!("async pipeline started");
        Ok(())
    }

    /// Stops the pipeline: drains queued tasks, finishes the in-flight one,
    /// then joins the worker.
    ///
    /// Results already produced stay retrievable through `get_result`
    /// afterwards. This is the "drain pending, finish in-flight" shutdown
    /// policy; tasks accepted by `push_task` before `stop` are never
    /// silently dropped. Consumers must keep draining the output queue
    /// until `stop` returns, since the worker blocks when it fills up.
    pub fn stop(&mut self) {
        self.input.close();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("async worker panicked during shutdown");
            }
        }
        info!("async pipeline stopped");
    }

    /// Submits a task without blocking.
    ///
    /// Returns `false` when the input queue is full, the pipeline has not
    /// been started, or the worker is gone; the caller retries or backs
    /// off.
    pub fn push_task(
        &self,
        image: RgbImage,
        task_id: i64,
        task_config: Option<PipelineTaskConfig>,
    ) -> bool {
        if !self.worker_alive.load(Ordering::Acquire) {
            return false;
        }
        self.input
            .try_push(AsyncTask {
                task_id,
                image,
                task_config,
            })
            .is_ok()
    }

    /// Non-blocking pop of one completed task; `None` when nothing is
    /// ready.
    pub fn get_result(&self) -> Option<AsyncTaskResult> {
        self.output.try_pop()
    }

    /// Handle for a collector thread to drain results.
    pub fn result_source(&self) -> ResultSource {
        ResultSource {
            queue: Arc::clone(&self.output),
            worker_alive: Arc::clone(&self.worker_alive),
        }
    }

    /// Whether the worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker_alive.load(Ordering::Acquire)
    }

    /// Number of tasks waiting in the input queue.
    pub fn queued_tasks(&self) -> usize {
        self.input.len()
    }
}

impl Drop for AsyncOcrPipeline {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

/// The single worker: dequeue, process, emit. Data-driven failures emit an
/// empty-results record with the original task id; the worker only exits
/// when the input queue closes.
fn worker_loop(
    mut pipeline: OcrPipeline,
    input: Arc<BoundedQueue<AsyncTask>>,
    output: Arc<BoundedQueue<AsyncTaskResult>>,
    worker_alive: Arc<AtomicBool>,
) {
    debug!("async worker running");
    loop {
        match input.pop_wait(Duration::from_millis(50)) {
            PopOutcome::Item(task) => {
                let result = match pipeline.process(&task.image, task.task_config.as_ref()) {
                    Ok((results, stats)) => AsyncTaskResult {
                        task_id: task.task_id,
                        results,
                        stats,
                        processed_image: pipeline.last_processed_image().cloned(),
                    },
                    Err(error) => {
                        warn!(task_id = task.task_id, %error, "task failed; emitting empty result");
                        AsyncTaskResult {
                            task_id: task.task_id,
                            results: Vec::new(),
                            stats: PipelineStats::default(),
                            processed_image: None,
                        }
                    }
                };
                if output.push_wait(result).is_err() {
                    warn!("output queue closed; dropping result and exiting");
                    break;
                }
            }
            PopOutcome::TimedOut => continue,
            PopOutcome::Closed => break,
        }
    }
    worker_alive.store(false, Ordering::Release);
    debug!("async worker exited");
}
