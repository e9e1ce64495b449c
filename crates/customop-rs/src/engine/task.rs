use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::downstream::{DownstreamEngine, FINALIZE_JOB_NAME};
use super::OpContext;
use crate::error::{EngineError, EngineResult, TaskError};
use crate::flags::{ExecFlags, FlagScope};
use crate::tensor::{NDArray, StorageKind, VarHandle};

pub(crate) type TaskFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Handles a pushed call touches, and which of them must be rebound afterwards.
///
/// `arrs` are the handles the callback works on, each labelled by the tag at the same position
/// in `tags`. After the callback, every non-dense entry whose tag is in `output_tags` is rebound
/// into the next handle of `outputs`, in order.
#[derive(Clone, Debug, Default)]
pub struct SparseBindings {
    pub arrs: Vec<NDArray>,
    pub tags: Vec<i32>,
    pub output_tags: HashSet<i32>,
    pub outputs: Vec<NDArray>,
}

impl SparseBindings {
    pub fn new(
        arrs: Vec<NDArray>,
        tags: Vec<i32>,
        output_tags: HashSet<i32>,
        outputs: Vec<NDArray>,
    ) -> Self {
        SparseBindings {
            arrs,
            tags,
            output_tags,
            outputs,
        }
    }

    fn needs_rebind(&self, index: usize) -> bool {
        !matches!(
            self.arrs[index].storage_type(),
            StorageKind::Dense | StorageKind::Undefined
        ) && self.output_tags.contains(&self.tags[index])
    }

    /// Number of `arrs` entries that will be rebound into `outputs`.
    pub fn rebind_count(&self) -> usize {
        (0..self.arrs.len())
            .filter(|&i| self.needs_rebind(i))
            .count()
    }

    pub(crate) fn validate(&self) -> EngineResult<()> {
        if self.tags.len() != self.arrs.len() {
            return Err(EngineError::TagCountMismatch {
                arrs: self.arrs.len(),
                tags: self.tags.len(),
            });
        }
        let expected = self.rebind_count();
        if self.outputs.len() != expected {
            return Err(EngineError::OutputCountMismatch {
                expected,
                actual: self.outputs.len(),
            });
        }
        Ok(())
    }

    /// Points each sparse output handle at the chunk its working copy ended up with.
    ///
    /// Returns the number of handles rebound.
    pub fn reconcile(&self) -> usize {
        let mut out_idx = 0;
        for (i, arr) in self.arrs.iter().enumerate() {
            if !self.needs_rebind(i) {
                continue;
            }
            self.outputs[out_idx].sparse_update_chunk(arr);
            out_idx += 1;
        }
        out_idx
    }

    /// Read set and write set for the finalize step, deduplicated and disjoint.
    pub(crate) fn engine_vars(&self) -> (Vec<VarHandle>, Vec<VarHandle>) {
        let mut mutable_vars = Vec::new();
        for (i, arr) in self.arrs.iter().enumerate() {
            let var = arr.var();
            if self.needs_rebind(i) && !mutable_vars.contains(&var) {
                mutable_vars.push(var);
            }
        }
        let mut const_vars = Vec::new();
        for arr in &self.arrs {
            let var = arr.var();
            if !mutable_vars.contains(&var) && !const_vars.contains(&var) {
                const_vars.push(var);
            }
        }
        (const_vars, mutable_vars)
    }
}

/// Runs `func`, turning both returned errors and panics into a [`TaskError`].
pub(crate) fn run_guarded(func: TaskFn) -> Result<(), TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(func)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(TaskError::Failed(err)),
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Rebinds outputs and fires the completion signal, or reports the failure without rebinding.
pub(crate) fn finish(outcome: Result<(), TaskError>, bindings: SparseBindings, ctx: OpContext) {
    match outcome {
        Ok(()) => {
            bindings.reconcile();
            ctx.complete(Ok(()));
        }
        Err(err) => {
            tracing::error!(error = %err, device = ?ctx.device(), "custom operator task failed");
            ctx.complete(Err(err));
        }
    }
}

/// Finalize state shared between the handoff and the job, so exactly one of them completes.
type FinalizeSlot = Mutex<Option<(SparseBindings, OpContext)>>;

fn take_finalize(slot: &FinalizeSlot) -> Option<(SparseBindings, OpContext)> {
    slot.lock().expect("finalize slot poisoned").take()
}

/// Hands the rebind-and-complete step to `engine`.
///
/// A panic out of `push_sync` is contained here. If the job has not run by then, the task is
/// completed with the panic instead.
fn hand_off(engine: &dyn DownstreamEngine, bindings: SparseBindings, ctx: OpContext) {
    let (const_vars, mutable_vars) = bindings.engine_vars();
    let device = ctx.device();
    let slot = Arc::new(Mutex::new(Some((bindings, ctx))));
    let job_slot = Arc::clone(&slot);

    let handoff = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.push_sync(
            Box::new(move || {
                if let Some((bindings, ctx)) = take_finalize(&job_slot) {
                    finish(Ok(()), bindings, ctx);
                }
            }),
            device,
            const_vars,
            mutable_vars,
            FINALIZE_JOB_NAME,
        )
    }));

    if let Err(payload) = handoff {
        let message = panic_message(payload.as_ref());
        match take_finalize(&slot) {
            Some((bindings, ctx)) => finish(
                Err(TaskError::Panicked(format!("downstream engine: {message}"))),
                bindings,
                ctx,
            ),
            None => tracing::error!(
                panic = %message,
                "downstream engine panicked after finalizing custom operator task"
            ),
        }
    }
}

/// A pushed call waiting for a pool worker.
pub(crate) struct Task {
    pub(crate) func: TaskFn,
    pub(crate) flags: ExecFlags,
    pub(crate) bindings: SparseBindings,
    pub(crate) ctx: OpContext,
    pub(crate) downstream: Option<Arc<dyn DownstreamEngine>>,
}

impl Task {
    pub(crate) fn run(self) {
        let Task {
            func,
            flags,
            bindings,
            ctx,
            downstream,
        } = self;

        let outcome = {
            let _scope = FlagScope::enter(flags);
            run_guarded(func)
        };

        match (outcome, downstream) {
            (Ok(()), Some(engine)) => hand_off(engine.as_ref(), bindings, ctx),
            (outcome, _) => finish(outcome, bindings, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Shape;

    fn sparse() -> NDArray {
        NDArray::empty_sparse(StorageKind::RowSparse, Shape::new([2, 2])).unwrap()
    }

    #[test]
    fn rebind_count_skips_dense_and_non_output_entries() {
        let bindings = SparseBindings::new(
            vec![NDArray::zeros(Shape::new([2])), sparse(), sparse(), NDArray::undefined()],
            vec![1, 0, 1, 1],
            HashSet::from([1]),
            vec![sparse()],
        );
        assert_eq!(bindings.rebind_count(), 1);
        assert!(bindings.validate().is_ok());
    }

    #[test]
    fn validate_reports_mismatches() {
        let bindings = SparseBindings::new(vec![sparse()], vec![], HashSet::new(), vec![]);
        assert!(matches!(
            bindings.validate(),
            Err(EngineError::TagCountMismatch { arrs: 1, tags: 0 })
        ));

        let bindings = SparseBindings::new(vec![sparse()], vec![1], HashSet::from([1]), vec![]);
        assert!(matches!(
            bindings.validate(),
            Err(EngineError::OutputCountMismatch {
                expected: 1,
                actual: 0
            })
        ));
    }

    #[test]
    fn engine_vars_are_disjoint() {
        let input = NDArray::zeros(Shape::new([2]));
        let out = sparse();
        let bindings = SparseBindings::new(
            vec![input.clone(), out.clone(), input.shallow_copy()],
            vec![0, 1, 0],
            HashSet::from([1]),
            vec![sparse()],
        );
        let (const_vars, mutable_vars) = bindings.engine_vars();
        assert_eq!(const_vars, vec![input.var()]);
        assert_eq!(mutable_vars, vec![out.var()]);
    }

    #[test]
    fn guarded_run_captures_errors_and_panics() {
        assert!(run_guarded(Box::new(|| -> anyhow::Result<()> { Ok(()) })).is_ok());
        let err = run_guarded(Box::new(|| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("bad shape"))
        }))
        .unwrap_err();
        assert!(matches!(err, TaskError::Failed(_)));
        assert!(err.to_string().contains("bad shape"));
        let err = run_guarded(Box::new(|| -> anyhow::Result<()> { panic!("kernel exploded") }))
            .unwrap_err();
        assert!(matches!(err, TaskError::Panicked(ref msg) if msg == "kernel exploded"));
    }
}
