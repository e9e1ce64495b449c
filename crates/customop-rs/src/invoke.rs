//! Forward and backward invocation of foreign operators through the engine.
//!
//! Both entry points flatten the operator's tensors into one list of shallow copies, label each
//! copy with its role tag, and push a callback that hands the copies to the operator. The
//! callback always runs with recording disabled, so autograd never traces the operator's body,
//! and with the training flag set to `is_train`. The caller's own handles for sparse outputs
//! (forward) or sparse input gradients (backward) are rebound once the callback returns.

use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::{CustomOpEngine, OpContext, SparseBindings};
use crate::error::EngineResult;
use crate::flags::ExecFlags;
use crate::op::CustomOp;
use crate::tensor::{NDArray, StorageKind};

pub const TAG_INPUT: i32 = 0;
pub const TAG_OUTPUT: i32 = 1;
pub const TAG_AUX: i32 = 2;
pub const TAG_OUT_GRAD: i32 = 3;
pub const TAG_IN_GRAD: i32 = 4;

/// Accumulates the flat, tagged argument list for one call.
#[derive(Default)]
struct CallArgs {
    arrs: Vec<NDArray>,
    tags: Vec<i32>,
    outputs: Vec<NDArray>,
}

impl CallArgs {
    /// Appends shallow copies of `handles` under `tag` and returns the copies.
    fn push_group(&mut self, handles: &[NDArray], tag: i32, rebind: bool) -> Vec<NDArray> {
        let copies: Vec<NDArray> = handles.iter().map(NDArray::shallow_copy).collect();
        for (handle, copy) in handles.iter().zip(&copies) {
            self.arrs.push(copy.clone());
            self.tags.push(tag);
            if rebind && !matches!(
                handle.storage_type(),
                StorageKind::Dense | StorageKind::Undefined
            ) {
                self.outputs.push(handle.clone());
            }
        }
        copies
    }

    fn into_bindings(self, output_tag: i32) -> SparseBindings {
        SparseBindings::new(
            self.arrs,
            self.tags,
            HashSet::from([output_tag]),
            self.outputs,
        )
    }
}

/// Pushes `op.forward` for the given handles.
pub fn forward(
    engine: &CustomOpEngine,
    op: Arc<dyn CustomOp>,
    ctx: OpContext,
    is_train: bool,
    inputs: &[NDArray],
    outputs: &[NDArray],
    aux: &[NDArray],
) -> EngineResult<()> {
    let mut args = CallArgs::default();
    let in_data = args.push_group(inputs, TAG_INPUT, false);
    let out_data = args.push_group(outputs, TAG_OUTPUT, true);
    let aux_data = args.push_group(aux, TAG_AUX, false);

    engine.push(
        move || op.forward(is_train, &in_data, &out_data, &aux_data),
        ctx,
        ExecFlags::new(false, is_train),
        args.into_bindings(TAG_OUTPUT),
    )
}

/// Pushes `op.backward`; sparse handles in `in_grads` are the ones rebound.
#[allow(clippy::too_many_arguments)]
pub fn backward(
    engine: &CustomOpEngine,
    op: Arc<dyn CustomOp>,
    ctx: OpContext,
    is_train: bool,
    out_grads: &[NDArray],
    inputs: &[NDArray],
    outputs: &[NDArray],
    in_grads: &[NDArray],
    aux: &[NDArray],
) -> EngineResult<()> {
    let mut args = CallArgs::default();
    let out_grad = args.push_group(out_grads, TAG_OUT_GRAD, false);
    let in_data = args.push_group(inputs, TAG_INPUT, false);
    let out_data = args.push_group(outputs, TAG_OUTPUT, false);
    let in_grad = args.push_group(in_grads, TAG_IN_GRAD, true);
    let aux_data = args.push_group(aux, TAG_AUX, false);

    engine.push(
        move || op.backward(&out_grad, &in_data, &out_data, &in_grad, &aux_data),
        ctx,
        ExecFlags::new(false, is_train),
        args.into_bindings(TAG_IN_GRAD),
    )
}
