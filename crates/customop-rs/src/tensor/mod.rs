//! Tensor handles exchanged between the runtime and foreign operator callbacks.
//!
//! An [`NDArray`] handle points at a backing chunk that other handles may share. Sparse results
//! written during an operator call reach the caller's handles by rebinding them to the new chunk.

mod ndarray;
pub mod shape;
pub mod storage;

pub use ndarray::{Chunk, NDArray, VarHandle};
pub use shape::Shape;
pub use storage::StorageKind;
