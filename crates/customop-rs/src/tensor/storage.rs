//! Storage layouts an [`NDArray`](super::NDArray) can be backed by.

/// How a tensor's values are laid out in memory.
///
/// Only dense storage is reused in place across an operator call. Sparse storage is
/// sized at compute time, so its backing chunk may be replaced while the operator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// Placeholder handle with no storage attached.
    Undefined,
    /// Contiguous row-major values.
    Dense,
    /// Non-zero rows only, with a row index array.
    RowSparse,
    /// Compressed sparse rows with row pointers and column indices.
    Csr,
}

impl StorageKind {
    /// Whether a chunk of this kind can move during execution.
    pub fn is_sparse(self) -> bool {
        matches!(self, StorageKind::RowSparse | StorageKind::Csr)
    }

    /// Number of auxiliary index arrays carried next to the values.
    pub fn num_aux(self) -> usize {
        match self {
            StorageKind::Undefined | StorageKind::Dense => 0,
            StorageKind::RowSparse => 1,
            StorageKind::Csr => 2,
        }
    }
}
