//! Correlated result delivery for concurrent producers.
//!
//! The async pipeline's FIFO output queue is enough for a single consumer,
//! but when multiple requesters each await *their own* result, someone has
//! to demultiplex. [`ResultCollector`] runs a background thread that drains
//! the output queue into a task-id-keyed map and signals a condition
//! variable; requesters block in [`ResultCollector::wait_for_result`] with
//! a deadline.
//!
//! A requester that times out leaves its result behind; such orphans are
//! evicted once they exceed a bounded age, so the map cannot grow without
//! limit.

use crate::core::constants::{DEFAULT_ORPHAN_TTL_MS, DEFAULT_WAIT_TIMEOUT_MS};
use crate::pipeline::async_pipeline::{AsyncTaskResult, ResultSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default deadline for [`ResultCollector::wait_for_result`].
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS);

struct MapEntry {
    inserted_at: Instant,
    result: AsyncTaskResult,
}

struct Shared {
    map: Mutex<HashMap<i64, MapEntry>>,
    available: Condvar,
    running: AtomicBool,
    orphan_ttl: Duration,
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Background collector that indexes async pipeline results by task id.
pub struct ResultCollector {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ResultCollector {
    /// Starts a collector over the pipeline's result source with the
    /// default orphan TTL.
    pub fn start(source: ResultSource) -> Self {
        Self::with_orphan_ttl(source, Duration::from_millis(DEFAULT_ORPHAN_TTL_MS))
    }

    /// Starts a collector that evicts uncollected results older than
    /// `orphan_ttl`.
    pub fn with_orphan_ttl(source: ResultSource, orphan_ttl: Duration) -> Self {
        let shared = Arc::new(Shared {
            map: Mutex::new(HashMap::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            orphan_ttl,
        });

        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::spawn(move || collector_loop(source, thread_shared));

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Blocks until the result for `task_id` arrives or `timeout` passes.
    ///
    /// Returns `None` on timeout; the pipeline keeps running and the result
    /// (should it arrive later) ages out of the map.
    pub fn wait_for_result(&self, task_id: i64, timeout: Duration) -> Option<AsyncTaskResult> {
        let deadline = Instant::now() + timeout;
        let mut map = lock_ignore_poison(&self.shared.map);
        loop {
            if let Some(entry) = map.remove(&task_id) {
                return Some(entry.result);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .shared
                .available
                .wait_timeout(map, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map = guard;
        }
    }

    /// [`ResultCollector::wait_for_result`] with the default 10 s deadline.
    pub fn wait_for_result_default(&self, task_id: i64) -> Option<AsyncTaskResult> {
        self.wait_for_result(task_id, DEFAULT_WAIT_TIMEOUT)
    }

    /// Number of results currently parked in the map.
    pub fn pending(&self) -> usize {
        lock_ignore_poison(&self.shared.map).len()
    }

    /// Stops the collector thread. Results already indexed stay available
    /// to `wait_for_result`.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ResultCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn collector_loop(source: ResultSource, shared: Arc<Shared>) {
    debug!("result collector running");
    while shared.running.load(Ordering::Acquire) {
        match source.try_next() {
            Some(result) => {
                let mut map = lock_ignore_poison(&shared.map);
                evict_orphans(&mut map, shared.orphan_ttl);
                let task_id = result.task_id;
                if map
                    .insert(
                        task_id,
                        MapEntry {
                            inserted_at: Instant::now(),
                            result,
                        },
                    )
                    .is_some()
                {
                    warn!(task_id, "duplicate task id replaced in result map");
                }
                drop(map);
                shared.available.notify_all();
            }
            None => {
                // The queue signals readiness through the pipeline, not this
                // thread, so a short sleep beats a busy spin.
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
    debug!("result collector exited");
}

fn evict_orphans(map: &mut HashMap<i64, MapEntry>, ttl: Duration) {
    let before = map.len();
    map.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    let evicted = before - map.len();
    if evicted > 0 {
        warn!(evicted, "evicted orphaned results past their TTL");
    }
}
