//! Shared tensor handles whose backing chunk can be rebound after execution.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use anyhow::{bail, ensure, Result};

use super::{Shape, StorageKind};

static VAR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_var() -> VarHandle {
    VarHandle(VAR_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed))
}

/// Token identifying a chunk to a dependency-tracking scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarHandle(u64);

impl VarHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Backing storage shared by every handle that points at it.
pub struct Chunk {
    var: VarHandle,
    shape: Shape,
    data: RwLock<Vec<f32>>,
    aux: Vec<Vec<i64>>,
}

impl Chunk {
    fn new(var: VarHandle, shape: Shape, data: Vec<f32>, aux: Vec<Vec<i64>>) -> Arc<Self> {
        Arc::new(Chunk {
            var,
            shape,
            data: RwLock::new(data),
            aux,
        })
    }

    pub fn var(&self) -> VarHandle {
        self.var
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Stored values: every element for dense chunks, the non-zeros for sparse ones.
    pub fn values(&self) -> Vec<f32> {
        self.data.read().expect("chunk data poisoned").clone()
    }

    pub fn aux(&self, index: usize) -> Option<&[i64]> {
        self.aux.get(index).map(Vec::as_slice)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("var", &self.var)
            .field("shape", &self.shape.dims())
            .field("aux", &self.aux.len())
            .finish()
    }
}

/// Cheaply clonable tensor handle.
///
/// `clone` returns another view of the same handle: rebinding one rebinds all clones.
/// [`NDArray::shallow_copy`] returns an independent handle that initially shares the chunk,
/// which is what an operator callback receives. Dense writes land in the shared chunk,
/// whereas sparse reallocation only moves the handle it was performed on. Callers bring
/// their own handles back in line with [`NDArray::sparse_update_chunk`].
#[derive(Clone)]
pub struct NDArray {
    stype: StorageKind,
    slot: Arc<RwLock<Arc<Chunk>>>,
}

impl NDArray {
    fn from_chunk(stype: StorageKind, chunk: Arc<Chunk>) -> Self {
        NDArray {
            stype,
            slot: Arc::new(RwLock::new(chunk)),
        }
    }

    /// Dense tensor from row-major values, validating the length against the shape.
    pub fn dense(shape: Shape, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape.dims()
            );
        }
        Ok(Self::from_chunk(
            StorageKind::Dense,
            Chunk::new(next_var(), shape, data, Vec::new()),
        ))
    }

    pub fn zeros(shape: Shape) -> Self {
        let len = shape.num_elements();
        Self::from_chunk(
            StorageKind::Dense,
            Chunk::new(next_var(), shape, vec![0.0; len], Vec::new()),
        )
    }

    /// Row-sparse tensor holding full rows for each entry of `row_idx`.
    pub fn row_sparse(shape: Shape, values: Vec<f32>, row_idx: Vec<i64>) -> Result<Self> {
        let aux = vec![row_idx];
        validate_sparse(StorageKind::RowSparse, &shape, &values, &aux)?;
        Ok(Self::from_chunk(
            StorageKind::RowSparse,
            Chunk::new(next_var(), shape, values, aux),
        ))
    }

    /// CSR matrix from non-zero values, row pointers, and column indices.
    pub fn csr(
        shape: Shape,
        values: Vec<f32>,
        indptr: Vec<i64>,
        indices: Vec<i64>,
    ) -> Result<Self> {
        let aux = vec![indptr, indices];
        validate_sparse(StorageKind::Csr, &shape, &values, &aux)?;
        Ok(Self::from_chunk(
            StorageKind::Csr,
            Chunk::new(next_var(), shape, values, aux),
        ))
    }

    /// All-zero sparse tensor with no stored entries, typically an output awaiting compute.
    pub fn empty_sparse(stype: StorageKind, shape: Shape) -> Result<Self> {
        let aux = match stype {
            StorageKind::RowSparse => vec![Vec::new()],
            StorageKind::Csr => {
                ensure!(shape.rank() == 2, "csr storage requires a rank-2 shape");
                vec![vec![0; shape.rows() + 1], Vec::new()]
            }
            other => bail!("{other:?} is not a sparse storage kind"),
        };
        Ok(Self::from_chunk(
            stype,
            Chunk::new(next_var(), shape, Vec::new(), aux),
        ))
    }

    /// Handle with no storage attached.
    pub fn undefined() -> Self {
        Self::from_chunk(
            StorageKind::Undefined,
            Chunk::new(next_var(), Shape::new([0]), Vec::new(), Vec::new()),
        )
    }

    pub fn storage_type(&self) -> StorageKind {
        self.stype
    }

    pub fn shape(&self) -> Shape {
        self.chunk().shape().clone()
    }

    pub fn var(&self) -> VarHandle {
        self.chunk().var()
    }

    /// The chunk this handle currently points at.
    pub fn chunk(&self) -> Arc<Chunk> {
        Arc::clone(&self.slot.read().expect("ndarray slot poisoned"))
    }

    /// New handle sharing the current chunk but free to be rebound independently.
    pub fn shallow_copy(&self) -> Self {
        Self::from_chunk(self.stype, self.chunk())
    }

    /// True when both values are clones of one handle.
    pub fn is_same_handle(&self, other: &NDArray) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    pub fn shares_chunk(&self, other: &NDArray) -> bool {
        Arc::ptr_eq(&self.chunk(), &other.chunk())
    }

    pub fn values(&self) -> Vec<f32> {
        self.chunk().values()
    }

    pub fn aux(&self, index: usize) -> Option<Vec<i64>> {
        self.chunk().aux(index).map(<[i64]>::to_vec)
    }

    /// Mutates dense storage in place; the change is visible through every handle on the chunk.
    pub fn update_dense<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut [f32]),
    {
        ensure!(
            self.stype == StorageKind::Dense,
            "in-place update requires dense storage, got {:?}",
            self.stype
        );
        let chunk = self.chunk();
        let mut data = chunk.data.write().expect("chunk data poisoned");
        f(&mut data);
        Ok(())
    }

    /// Replaces this handle's sparse storage with a freshly allocated chunk.
    ///
    /// Other handles keep pointing at the old chunk. The engine variable is carried over.
    pub fn realloc_sparse(&self, shape: Shape, values: Vec<f32>, aux: Vec<Vec<i64>>) -> Result<()> {
        ensure!(
            self.stype.is_sparse(),
            "sparse reallocation requires sparse storage, got {:?}",
            self.stype
        );
        validate_sparse(self.stype, &shape, &values, &aux)?;
        let mut slot = self.slot.write().expect("ndarray slot poisoned");
        let var = slot.var();
        *slot = Chunk::new(var, shape, values, aux);
        Ok(())
    }

    /// Points this handle at `other`'s current chunk.
    pub fn sparse_update_chunk(&self, other: &NDArray) {
        debug_assert_eq!(
            self.stype, other.stype,
            "sparse chunk rebinding across storage kinds"
        );
        let chunk = other.chunk();
        *self.slot.write().expect("ndarray slot poisoned") = chunk;
    }

    /// Materializes the logical row-major contents.
    pub fn to_dense(&self) -> Vec<f32> {
        let chunk = self.chunk();
        let values = chunk.values();
        match self.stype {
            StorageKind::Undefined => Vec::new(),
            StorageKind::Dense => values,
            StorageKind::RowSparse => {
                let width = chunk.shape().row_width();
                let mut out = vec![0.0; chunk.shape().num_elements()];
                for (k, &row) in chunk.aux[0].iter().enumerate() {
                    let row = row as usize;
                    out[row * width..(row + 1) * width]
                        .copy_from_slice(&values[k * width..(k + 1) * width]);
                }
                out
            }
            StorageKind::Csr => {
                let cols = chunk.shape().row_width();
                let (indptr, indices) = (&chunk.aux[0], &chunk.aux[1]);
                let mut out = vec![0.0; chunk.shape().num_elements()];
                for row in 0..indptr.len().saturating_sub(1) {
                    for k in indptr[row] as usize..indptr[row + 1] as usize {
                        out[row * cols + indices[k] as usize] = values[k];
                    }
                }
                out
            }
        }
    }
}

impl fmt::Debug for NDArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NDArray")
            .field("stype", &self.stype)
            .field("chunk", &self.chunk())
            .finish()
    }
}

fn validate_sparse(
    stype: StorageKind,
    shape: &Shape,
    values: &[f32],
    aux: &[Vec<i64>],
) -> Result<()> {
    ensure!(
        aux.len() == stype.num_aux(),
        "{stype:?} storage expects {} aux arrays, got {}",
        stype.num_aux(),
        aux.len()
    );
    match stype {
        StorageKind::RowSparse => {
            let rows = shape.rows() as i64;
            let row_idx = &aux[0];
            ensure!(
                values.len() == row_idx.len() * shape.row_width(),
                "row-sparse values length ({}) does not match {} rows of width {}",
                values.len(),
                row_idx.len(),
                shape.row_width()
            );
            ensure!(
                row_idx.iter().all(|&row| (0..rows).contains(&row)),
                "row index out of bounds for shape {:?}",
                shape.dims()
            );
        }
        StorageKind::Csr => {
            ensure!(shape.rank() == 2, "csr storage requires a rank-2 shape");
            let (rows, cols) = (shape.rows(), shape.row_width() as i64);
            let (indptr, indices) = (&aux[0], &aux[1]);
            ensure!(
                indptr.len() == rows + 1,
                "csr indptr length ({}) must be rows + 1 ({})",
                indptr.len(),
                rows + 1
            );
            ensure!(
                indices.len() == values.len(),
                "csr indices length ({}) does not match values length ({})",
                indices.len(),
                values.len()
            );
            ensure!(
                indptr.windows(2).all(|pair| pair[0] <= pair[1])
                    && indptr.last().copied() == Some(values.len() as i64),
                "csr indptr must be non-decreasing and end at the number of values"
            );
            ensure!(
                indices.iter().all(|&col| (0..cols).contains(&col)),
                "csr column index out of bounds for shape {:?}",
                shape.dims()
            );
        }
        other => bail!("{other:?} is not a sparse storage kind"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_handle_shallow_copy_does_not() {
        let a = NDArray::zeros(Shape::new([2]));
        let clone = a.clone();
        let copy = a.shallow_copy();
        assert!(a.is_same_handle(&clone));
        assert!(!a.is_same_handle(&copy));
        assert!(a.shares_chunk(&copy));
        assert_eq!(a.var(), copy.var());
    }

    #[test]
    fn dense_writes_are_visible_through_copies() {
        let a = NDArray::zeros(Shape::new([3]));
        let copy = a.shallow_copy();
        copy.update_dense(|data| data[1] = 5.0).unwrap();
        assert_eq!(a.values(), vec![0.0, 5.0, 0.0]);
    }

    #[test]
    fn sparse_realloc_moves_only_the_reallocated_handle() {
        let out = NDArray::empty_sparse(StorageKind::RowSparse, Shape::new([4, 2])).unwrap();
        let copy = out.shallow_copy();
        copy.realloc_sparse(Shape::new([4, 2]), vec![1.0, 2.0], vec![vec![3]])
            .unwrap();
        assert!(!out.shares_chunk(&copy));
        assert_eq!(out.to_dense(), vec![0.0; 8]);
        assert_eq!(copy.var(), out.var());

        out.sparse_update_chunk(&copy);
        assert!(out.shares_chunk(&copy));
        assert_eq!(out.to_dense(), vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn csr_densifies() {
        let m = NDArray::csr(
            Shape::new([2, 3]),
            vec![1.0, 2.0, 3.0],
            vec![0, 1, 3],
            vec![2, 0, 1],
        )
        .unwrap();
        assert_eq!(m.to_dense(), vec![0.0, 0.0, 1.0, 2.0, 3.0, 0.0]);
        assert_eq!(m.aux(0), Some(vec![0, 1, 3]));
    }

    #[test]
    fn rejects_malformed_sparse_payloads() {
        assert!(NDArray::row_sparse(Shape::new([2, 2]), vec![1.0], vec![0]).is_err());
        assert!(NDArray::row_sparse(Shape::new([2, 2]), vec![1.0, 1.0], vec![5]).is_err());
        assert!(NDArray::csr(Shape::new([2, 2]), vec![1.0], vec![0, 1], vec![0]).is_err());
        assert!(NDArray::csr(Shape::new([2, 2]), vec![1.0], vec![0, 0, 1], vec![7]).is_err());
        let dense = NDArray::zeros(Shape::new([2]));
        assert!(dense
            .realloc_sparse(Shape::new([2]), Vec::new(), Vec::new())
            .is_err());
        assert!(NDArray::empty_sparse(StorageKind::Dense, Shape::new([2])).is_err());
    }
}
