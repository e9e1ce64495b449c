//! Interfaces implemented by foreign operators.

use std::sync::Arc;

use anyhow::Result;

use crate::engine::Device;
use crate::tensor::NDArray;

/// Executable half of a foreign operator.
///
/// Callbacks receive shallow copies of the caller's handles. Dense outputs are written in
/// place, sparse outputs are reallocated with [`NDArray::realloc_sparse`] and rebound to the
/// caller's handles once the callback returns.
pub trait CustomOp: Send + Sync {
    fn forward(
        &self,
        is_train: bool,
        in_data: &[NDArray],
        out_data: &[NDArray],
        aux: &[NDArray],
    ) -> Result<()>;

    fn backward(
        &self,
        out_grad: &[NDArray],
        in_data: &[NDArray],
        out_data: &[NDArray],
        in_grad: &[NDArray],
        aux: &[NDArray],
    ) -> Result<()>;
}

/// Static description of a foreign operator, produced by its registered creator.
pub trait CustomOpProp: Send {
    fn list_arguments(&self) -> Vec<String> {
        vec!["data".to_string()]
    }

    fn list_outputs(&self) -> Vec<String> {
        vec!["output".to_string()]
    }

    fn list_auxiliary_states(&self) -> Vec<String> {
        Vec::new()
    }

    fn create_operator(&self, device: Device) -> Result<Arc<dyn CustomOp>>;
}

/// Factory registered per operator type; receives the operator's keyword arguments.
pub type OpPropCreator =
    Arc<dyn Fn(&[(String, String)]) -> Result<Box<dyn CustomOpProp>> + Send + Sync>;
