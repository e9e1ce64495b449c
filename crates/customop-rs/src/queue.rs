//! FIFO of pending jobs together with the idle-worker count.
//!
//! The queue carries no lock of its own: it lives inside the pool state and is only touched
//! while the pool mutex is held, which keeps a pop and the matching idle decrement atomic with
//! respect to pushes and growth decisions.

use std::collections::VecDeque;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub(crate) struct TaskQueue {
    jobs: VecDeque<Job>,
    idle: usize,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Removes the head job and marks the worker taking it as busy.
    pub(crate) fn take(&mut self) -> Option<Job> {
        let job = self.jobs.pop_front()?;
        debug_assert!(self.idle > 0, "job taken with no idle worker accounted");
        self.idle = self.idle.saturating_sub(1);
        Some(job)
    }

    /// Records a worker entering the idle set, either freshly spawned or done with a job.
    pub(crate) fn mark_idle(&mut self) {
        self.idle += 1;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub(crate) fn pending(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle
    }

    /// Pending jobs that no idle worker is available to pick up.
    pub(crate) fn deficit(&self) -> usize {
        self.jobs.len().saturating_sub(self.idle)
    }
}
