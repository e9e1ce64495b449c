//! Boundary to the dependency-tracking scheduler that finalizes pooled tasks.
//!
//! When one is attached, a worker does not rebind outputs itself after the callback returns.
//! It hands the rebind-and-complete step to the scheduler together with the engine variables
//! the step reads and writes, so the scheduler can order it against other work on the same
//! tensors.

use super::Device;
use crate::tensor::VarHandle;

pub type FinalizeJob = Box<dyn FnOnce() + Send + 'static>;

/// Name under which finalize jobs are submitted.
pub const FINALIZE_JOB_NAME: &str = "CustomOperator";

pub trait DownstreamEngine: Send + Sync {
    /// Schedules `job` after all pending work on `const_vars` (read) and `mutable_vars` (write).
    ///
    /// The two variable lists are disjoint and free of duplicates. If this panics before `job`
    /// has run, the task completes with [`TaskError::Panicked`](crate::TaskError::Panicked).
    fn push_sync(
        &self,
        job: FinalizeJob,
        device: Device,
        const_vars: Vec<VarHandle>,
        mutable_vars: Vec<VarHandle>,
        name: &'static str,
    );
}

/// Runs finalize jobs immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineEngine;

impl DownstreamEngine for InlineEngine {
    fn push_sync(
        &self,
        job: FinalizeJob,
        _device: Device,
        _const_vars: Vec<VarHandle>,
        _mutable_vars: Vec<VarHandle>,
        _name: &'static str,
    ) {
        job();
    }
}
