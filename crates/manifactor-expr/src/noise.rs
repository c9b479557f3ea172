//! Noise model interface consumed by linearizing factors.
//!
//! The linearization core does not whiten anything itself; it only needs to
//! know whether a model represents a hard constraint, and if so which
//! degenerate weighting to attach to the linearized factor so the solver
//! treats those rows as equality constraints. Actual whitening math lives
//! downstream with the solver.

use nalgebra::DVector;
use std::fmt::Debug;
use std::sync::Arc;

/// Weighting model attached to a measurement.
pub trait NoiseModel: Debug + Send + Sync {
    /// Residual dimension this model weights.
    fn dimension(&self) -> usize;

    /// Returns `true` for hard-constraint (zero-noise) models.
    fn is_constrained(&self) -> bool {
        false
    }

    /// For constrained models, the designated weighting to attach to the
    /// linearized factor: the same constraint mask with unit sigmas on all
    /// unconstrained rows. `None` for ordinary models.
    fn constrained_weighting(&self) -> Option<Arc<dyn NoiseModel>> {
        None
    }
}

/// Isotropic Gaussian noise: one sigma for every residual row.
#[derive(Debug, Clone)]
pub struct Isotropic {
    dim: usize,
    sigma: f64,
}

impl Isotropic {
    /// Creates an isotropic model with the given standard deviation.
    ///
    /// # Panics
    ///
    /// Panics if `sigma` is not strictly positive; a zero sigma is a hard
    /// constraint and belongs to [`Constrained`].
    pub fn new(dim: usize, sigma: f64) -> Self {
        assert!(sigma > 0.0, "sigma must be positive, got {sigma}");
        Self { dim, sigma }
    }

    /// Unit-sigma model of the given dimension.
    pub fn unit(dim: usize) -> Self {
        Self::new(dim, 1.0)
    }

    /// The standard deviation.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl NoiseModel for Isotropic {
    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Hard-constraint model: rows with zero sigma are equality constraints.
#[derive(Debug, Clone)]
pub struct Constrained {
    sigmas: DVector<f64>,
}

impl Constrained {
    /// Creates a model from per-row sigmas; zero entries mark constrained
    /// rows.
    pub fn from_sigmas(sigmas: DVector<f64>) -> Self {
        Self { sigmas }
    }

    /// A model constraining every row.
    pub fn all(dim: usize) -> Self {
        Self {
            sigmas: DVector::zeros(dim),
        }
    }

    /// Per-row sigmas; zero entries are hard constraints.
    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }
}

impl NoiseModel for Constrained {
    fn dimension(&self) -> usize {
        self.sigmas.len()
    }

    fn is_constrained(&self) -> bool {
        true
    }

    fn constrained_weighting(&self) -> Option<Arc<dyn NoiseModel>> {
        let unit_sigmas = self.sigmas.map(|s| if s == 0.0 { 0.0 } else { 1.0 });
        Some(Arc::new(Constrained {
            sigmas: unit_sigmas,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isotropic_is_not_constrained() {
        let model = Isotropic::new(3, 0.5);
        assert_eq!(model.dimension(), 3);
        assert!(!model.is_constrained());
        assert!(model.constrained_weighting().is_none());
    }

    #[test]
    #[should_panic(expected = "sigma must be positive")]
    fn test_isotropic_rejects_zero_sigma() {
        Isotropic::new(2, 0.0);
    }

    #[test]
    fn test_constrained_weighting_has_unit_free_rows() {
        let model = Constrained::from_sigmas(DVector::from_vec(vec![0.0, 0.3, 0.0]));
        assert!(model.is_constrained());

        let weighting = model.constrained_weighting().unwrap();
        assert!(weighting.is_constrained());
        assert_eq!(weighting.dimension(), 3);
    }
}
