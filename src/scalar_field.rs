// src/scalar_field.rs

use crate::grid::Grid2D;

/// Scalar potential field defined on a 2D grid.
/// Each cell stores one f64 value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField2D {
    pub grid: Grid2D,
    pub data: Vec<f64>,
}

impl ScalarField2D {
    /// Create a new field on the given grid, initialised to zero.
    pub fn new(grid: Grid2D) -> Self {
        let n = grid.n_cells();
        Self {
            grid,
            data: vec![0.0; n],
        }
    }

    /// Get the flat index in `data` for grid indices (i, j).
    #[inline]
    pub fn idx(&self, i: usize, j: usize) -> usize {
        self.grid.idx(i, j)
    }

    /// Value at (i, j).
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.data[self.grid.idx(i, j)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid2D;

    #[test]
    fn new_field_is_zero_filled() {
        let grid = Grid2D::new(3, 5);
        let phi = ScalarField2D::new(grid);
        assert_eq!(phi.data.len(), 15);
        assert!(phi.data.iter().all(|&v| v == 0.0));
    }
}
