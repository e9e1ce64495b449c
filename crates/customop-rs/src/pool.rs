//! Growable worker pool draining a single shared FIFO.
//!
//! Workers are spawned lazily: a submission that leaves more pending jobs than idle workers
//! grows the pool by the difference, up to `max_workers`. The pool never shrinks. Shutdown
//! lets workers drain whatever is still queued before joining them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::error::{EngineError, EngineResult};
use crate::queue::{Job, TaskQueue};

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers spawned so far. Never decreases, including after shutdown.
    pub workers: usize,
    pub idle: usize,
    pub pending: usize,
}

struct PoolState {
    queue: TaskQueue,
    spawned: usize,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("worker pool state poisoned")
    }
}

pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    max_workers: usize,
}

impl WorkerPool {
    pub(crate) fn new(max_workers: usize) -> Self {
        WorkerPool {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    queue: TaskQueue::new(),
                    spawned: 0,
                    shutting_down: false,
                }),
                cv: Condvar::new(),
            }),
            handles: Mutex::new(Vec::new()),
            max_workers,
        }
    }

    /// Enqueues `job`, grows the pool if no idle worker can take it, and wakes the workers.
    pub(crate) fn submit(&self, job: Job) -> EngineResult<()> {
        let mut state = self.shared.lock();
        if state.shutting_down {
            return Err(EngineError::ShutDown);
        }
        state.queue.push(job);
        tracing::debug!(
            pending = state.queue.pending(),
            idle = state.queue.idle(),
            "queued custom operator task"
        );
        let deficit = state.queue.deficit();
        if deficit > 0 {
            self.grow_locked(&mut state, deficit);
        }
        drop(state);
        self.shared.cv.notify_all();
        Ok(())
    }

    /// Spawns up to `delta` additional workers, clamped to the cap. Returns how many started.
    pub(crate) fn grow_by(&self, delta: usize) -> usize {
        let mut state = self.shared.lock();
        if state.shutting_down {
            return 0;
        }
        self.grow_locked(&mut state, delta)
    }

    fn grow_locked(&self, state: &mut PoolState, delta: usize) -> usize {
        let target = state.spawned.saturating_add(delta).min(self.max_workers);
        let mut added = 0;
        while state.spawned < target {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("customop-worker-{}", state.spawned))
                .spawn(move || worker_loop(&shared));
            match spawned {
                Ok(handle) => {
                    self.handles
                        .lock()
                        .expect("worker handle list poisoned")
                        .push(handle);
                    state.spawned += 1;
                    state.queue.mark_idle();
                    added += 1;
                }
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        workers = state.spawned,
                        "failed to spawn custom operator worker"
                    );
                    break;
                }
            }
        }
        if added > 0 {
            tracing::debug!(
                added,
                workers = state.spawned,
                max_workers = self.max_workers,
                "grew custom operator worker pool"
            );
        }
        added
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            workers: state.spawned,
            idle: state.queue.idle(),
            pending: state.queue.pending(),
        }
    }

    /// Stops accepting work, lets workers drain the queue, and joins them.
    ///
    /// Concurrent callers all return only after every worker has exited. When this runs on a
    /// pool worker, typically because a task dropped the last engine handle, that worker is
    /// not joined; it finishes the queue and exits once its current job returns.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.shutting_down = true;
        }
        self.shared.cv.notify_all();

        let current = thread::current().id();
        let mut handles = self.handles.lock().expect("worker handle list poisoned");
        let mut joined = 0;
        for handle in handles.drain(..) {
            if handle.thread().id() == current {
                tracing::debug!(
                    worker = handle.thread().name().unwrap_or("unnamed"),
                    "pool shut down from its own worker; leaving it to exit after its job"
                );
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("custom operator worker exited by panic");
            }
            joined += 1;
        }
        if joined > 0 {
            tracing::info!(workers = joined, "custom operator worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        while state.queue.is_empty() && !state.shutting_down {
            state = shared.cv.wait(state).expect("worker pool state poisoned");
        }
        // An empty queue here means shutdown was requested and everything is drained.
        let Some(job) = state.queue.take() else {
            break;
        };
        drop(state);
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("custom operator job panicked outside its task boundary");
        }
        state = shared.lock();
        state.queue.mark_idle();
    }
}
