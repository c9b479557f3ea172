//! Numerical validation utilities for chart operations.
//!
//! Finite-difference Jacobians measured in local coordinates, used to check
//! every analytic derivative in the library against a centered
//! approximation.

use crate::chart::Chart;
use nalgebra::{DMatrix, DVector};

/// Default perturbation step for [`numerical_jacobian`].
pub const DEFAULT_STEP: f64 = 1e-5;

/// Centered finite-difference Jacobian of a chart-to-chart function.
///
/// Perturbs `at` along each tangent basis direction by `±step` through its
/// chart, and measures the output difference in the local coordinates of
/// `f(at)`. The result has `f(at).dimension()` rows and `at.dimension()`
/// columns, directly comparable to the analytic Jacobians produced by
/// manifold types and the expression engine.
pub fn numerical_jacobian<A, T, F>(f: F, at: &A, step: f64) -> DMatrix<f64>
where
    A: Chart,
    T: Chart,
    F: Fn(&A) -> T,
{
    let base = f(at);
    let rows = base.dimension();
    let cols = at.dimension();
    let mut jacobian = DMatrix::zeros(rows, cols);

    for j in 0..cols {
        let mut delta = DVector::zeros(cols);
        delta[j] = step;
        let plus = f(&at.retract(&delta));
        delta[j] = -step;
        let minus = f(&at.retract(&delta));

        let diff = (base.local_coordinates(&plus) - base.local_coordinates(&minus))
            / (2.0 * step);
        jacobian.set_column(j, &diff);
    }

    jacobian
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_numerical_jacobian_linear_map() {
        // f(x) = A x has Jacobian A everywhere.
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, -1.0, 0.5, 0.0]);
        let a2 = a.clone();
        let f = move |x: &DVector<f64>| -> DVector<f64> { &a2 * x };

        let at = DVector::from_vec(vec![0.3, -0.7, 1.1]);
        let jac = numerical_jacobian(f, &at, DEFAULT_STEP);
        assert_relative_eq!(jac, a, epsilon = 1e-8);
    }

    #[test]
    fn test_numerical_jacobian_scalar() {
        // f(x) = x^2 at x = 3 has derivative 6.
        let f = |x: &f64| -> f64 { x * x };
        let jac = numerical_jacobian(f, &3.0, DEFAULT_STEP);
        assert_eq!(jac.shape(), (1, 1));
        assert_relative_eq!(jac[(0, 0)], 6.0, epsilon = 1e-8);
    }

    #[test]
    fn test_numerical_jacobian_at_random_points() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        // f(x) = (x0*x1, sin(x2)) has a closed-form Jacobian to compare
        // against at arbitrary points.
        let f = |x: &DVector<f64>| -> DVector<f64> {
            DVector::from_vec(vec![x[0] * x[1], x[2].sin()])
        };

        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..10 {
            let at: DVector<f64> = DVector::from_fn(3, |_, _| rng.gen_range(-2.0..2.0));
            let expected =
                DMatrix::from_row_slice(2, 3, &[at[1], at[0], 0.0, 0.0, 0.0, at[2].cos()]);
            let jac = numerical_jacobian(f, &at, DEFAULT_STEP);
            assert_relative_eq!(jac, expected, epsilon = 1e-7);
        }
    }
}
