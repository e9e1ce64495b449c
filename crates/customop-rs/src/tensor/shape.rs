//! Tensor extents, viewed as rows of equal width for sparse layouts.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Panics on an empty dimension list: every handle has at least a row axis.
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        let dims = dims.into();
        assert!(!dims.is_empty(), "tensor shape needs a leading row axis");
        Shape { dims }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn rows(&self) -> usize {
        self.dims[0]
    }

    /// Elements per row, i.e. the product of every trailing axis.
    pub fn row_width(&self) -> usize {
        self.dims[1..].iter().product()
    }

    pub fn num_elements(&self) -> usize {
        self.rows() * self.row_width()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_and_width_cover_every_element() {
        let shape = Shape::new([4, 2, 3]);
        assert_eq!(shape.rows(), 4);
        assert_eq!(shape.row_width(), 6);
        assert_eq!(shape.num_elements(), 24);
        assert_eq!(Shape::new([5]).row_width(), 1);
    }
}
