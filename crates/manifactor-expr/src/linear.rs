//! Block-sparse linear factor produced by linearization.

use crate::noise::NoiseModel;
use manifactor_core::Key;
use nalgebra::{DMatrix, DMatrixView, DVector};
use std::sync::Arc;

/// One linearized measurement: ordered Jacobian blocks plus the negated
/// residual.
///
/// The matrix holds the horizontally concatenated per-variable Jacobian
/// blocks followed by a single right-hand-side column `b = -residual`, laid
/// out in key order, so the factor directly describes one block row of the
/// sparse system `J · Δ = b`. Invariant: block widths sum to one less than
/// the column count, and the row count equals the residual dimension.
#[derive(Debug, Clone)]
pub struct LinearFactor {
    /// (key, tangent width) pairs in ascending key order.
    keys: Vec<(Key, usize)>,
    /// `[residual_dim × (Σ width + 1)]` matrix; last column is `b`.
    ab: DMatrix<f64>,
    /// Degenerate weighting for hard-constraint factors, absent otherwise.
    noise: Option<Arc<dyn NoiseModel>>,
}

impl LinearFactor {
    /// Assembles a linear factor from ordered blocks and the stacked matrix.
    ///
    /// # Panics
    ///
    /// Panics if the block widths plus the residual column do not match the
    /// matrix's column count; the caller builds the matrix, so a mismatch is
    /// a programming error, not input data.
    pub fn new(
        keys: Vec<(Key, usize)>,
        ab: DMatrix<f64>,
        noise: Option<Arc<dyn NoiseModel>>,
    ) -> Self {
        let width: usize = keys.iter().map(|(_, w)| w).sum();
        assert_eq!(
            width + 1,
            ab.ncols(),
            "block widths plus the residual column must match the matrix"
        );
        Self { keys, ab, noise }
    }

    /// The (key, tangent width) pairs, in ascending key order.
    pub fn keys(&self) -> &[(Key, usize)] {
        &self.keys
    }

    /// Residual dimension (number of rows).
    pub fn residual_dimension(&self) -> usize {
        self.ab.nrows()
    }

    /// The Jacobian block of the `i`-th variable.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    pub fn jacobian_block(&self, i: usize) -> DMatrixView<'_, f64> {
        let offset: usize = self.keys[..i].iter().map(|(_, w)| w).sum();
        let width = self.keys[i].1;
        self.ab.view((0, offset), (self.ab.nrows(), width))
    }

    /// The right-hand side `b = -residual`.
    pub fn rhs(&self) -> DVector<f64> {
        self.ab.column(self.ab.ncols() - 1).into_owned()
    }

    /// The full `[A | b]` matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.ab
    }

    /// The attached degenerate weighting, present only for hard-constraint
    /// factors.
    pub fn noise(&self) -> Option<&Arc<dyn NoiseModel>> {
        self.noise.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_block_layout() {
        let keys = vec![(Key::new(1), 2), (Key::new(4), 3)];
        let mut ab = DMatrix::zeros(2, 6);
        ab[(0, 0)] = 1.0;
        ab[(1, 2)] = 2.0;
        ab[(0, 5)] = -0.5;

        let factor = LinearFactor::new(keys, ab, None);
        assert_eq!(factor.residual_dimension(), 2);
        assert_eq!(factor.jacobian_block(0).shape(), (2, 2));
        assert_eq!(factor.jacobian_block(1).shape(), (2, 3));
        assert_relative_eq!(factor.jacobian_block(1)[(1, 0)], 2.0, epsilon = 1e-15);
        assert_relative_eq!(factor.rhs()[0], -0.5, epsilon = 1e-15);
    }

    #[test]
    #[should_panic(expected = "must match the matrix")]
    fn test_width_invariant_is_checked() {
        LinearFactor::new(vec![(Key::new(0), 3)], DMatrix::zeros(2, 3), None);
    }
}
