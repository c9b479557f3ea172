//! Linearizing factor binding a measurement, an expression and a noise
//! model.

use crate::expression::{Expression, JacobianMap};
use crate::linear::LinearFactor;
use crate::noise::NoiseModel;
use manifactor_core::{Chart, Key, Result, Values};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Activity predicate over the current assignment.
pub type ActivityPredicate = Arc<dyn Fn(&Values) -> bool + Send + Sync>;

/// A measurement factor that linearizes itself through an expression.
///
/// The factor predicts the measured quantity by evaluating its expression
/// against the current assignment, forms the residual in the measurement's
/// tangent space, and assembles the expression's per-variable Jacobian
/// blocks into a [`LinearFactor`] for the solver.
///
/// A factor is **active** by default; an optional activity predicate can
/// deactivate it for assignments where the measurement carries no
/// information (e.g. out of validity range). Inactive factors contribute
/// nothing: [`linearize`](Self::linearize) returns `None`, which the caller
/// must treat as absence, not as an error or a zero factor.
pub struct ExpressionFactor<T: Chart> {
    noise: Arc<dyn NoiseModel>,
    measurement: T,
    expression: Expression<T>,
    activity: Option<ActivityPredicate>,
}

impl<T: Chart + Send + Sync + 'static> ExpressionFactor<T> {
    /// Creates a factor from a noise model, a measured value and the
    /// expression predicting it.
    ///
    /// # Panics
    ///
    /// Panics if the noise model's dimension differs from the measurement's
    /// tangent dimension.
    pub fn new(noise: Arc<dyn NoiseModel>, measurement: T, expression: Expression<T>) -> Self {
        assert_eq!(
            noise.dimension(),
            measurement.dimension(),
            "noise model dimension must match the measurement's tangent dimension"
        );
        Self {
            noise,
            measurement,
            expression,
            activity: None,
        }
    }

    /// Attaches an activity predicate deciding, per assignment, whether this
    /// factor contributes.
    pub fn with_activity(mut self, predicate: ActivityPredicate) -> Self {
        self.activity = Some(predicate);
        self
    }

    /// The variable keys this factor involves, in sorted order.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.expression.keys()
    }

    /// The noise model attached at construction.
    pub fn noise(&self) -> &Arc<dyn NoiseModel> {
        &self.noise
    }

    /// The measured value.
    pub fn measurement(&self) -> &T {
        &self.measurement
    }

    /// Whether the factor contributes for this assignment.
    pub fn is_active(&self, values: &Values) -> bool {
        self.activity.as_ref().map_or(true, |pred| pred(values))
    }

    /// Residual without noise weighting: the measurement's local coordinates
    /// of the predicted value.
    ///
    /// When `jacobians` is given it must be pre-sized to the factor's key
    /// count and is filled in key order with the per-leaf Jacobian blocks of
    /// the residual. The blocks are the expression's Jacobians: the
    /// measurement chart's local-coordinates derivative is the identity to
    /// first order around the predicted value.
    ///
    /// # Panics
    ///
    /// Panics if `jacobians` is present but sized differently from the key
    /// count; sizing the buffer is the caller's contract.
    pub fn unwhitened_error(
        &self,
        values: &Values,
        jacobians: Option<&mut Vec<DMatrix<f64>>>,
    ) -> Result<DVector<f64>> {
        match jacobians {
            Some(out) => {
                let keys = self.expression.keys();
                assert_eq!(
                    out.len(),
                    keys.len(),
                    "Jacobian output buffer must be pre-sized to the factor's key count"
                );
                let mut map = JacobianMap::new();
                let predicted = self.expression.value_and_jacobians(values, &mut map)?;
                for (slot, (_, block)) in out.iter_mut().zip(map.iter()) {
                    *slot = block.clone();
                }
                Ok(self.measurement.local_coordinates(&predicted))
            }
            None => {
                let predicted = self.expression.value(values)?;
                Ok(self.measurement.local_coordinates(&predicted))
            }
        }
    }

    /// Linearizes the factor at the current assignment.
    ///
    /// Returns `None` when the factor is inactive. Otherwise the result
    /// holds the Jacobian blocks ordered by key, with widths equal to each
    /// leaf's tangent dimension, and the right-hand side
    /// `b = -measurement.local_coordinates(predicted)`. Hard-constraint
    /// noise models attach their designated weighting so the solver treats
    /// the rows as equality constraints.
    pub fn linearize(&self, values: &Values) -> Result<Option<LinearFactor>> {
        if !self.is_active(values) {
            return Ok(None);
        }

        let mut map = JacobianMap::new();
        let predicted = self.expression.value_and_jacobians(values, &mut map)?;
        let b = -self.measurement.local_coordinates(&predicted);
        let rows = b.len();

        let keys: Vec<(Key, usize)> = map.iter().map(|(key, block)| (key, block.ncols())).collect();
        let total_width: usize = keys.iter().map(|(_, w)| w).sum();

        let mut ab = DMatrix::zeros(rows, total_width + 1);
        let mut offset = 0;
        for (_, block) in map.iter() {
            ab.view_mut((0, offset), (rows, block.ncols())).copy_from(block);
            offset += block.ncols();
        }
        ab.set_column(total_width, &b);

        Ok(Some(LinearFactor::new(
            keys,
            ab,
            self.noise.constrained_weighting(),
        )))
    }
}

/// Linearizes a slice of factors in parallel against a shared read-only
/// assignment.
///
/// The output preserves the input order with inactive factors skipped.
/// Linearization of distinct factors is independent, so this is a plain
/// data-parallel map; the assignment is only read.
pub fn linearize_all<T: Chart + Send + Sync + 'static>(
    factors: &[ExpressionFactor<T>],
    values: &Values,
) -> Result<Vec<LinearFactor>> {
    let linearized: Vec<Option<LinearFactor>> = factors
        .par_iter()
        .map(|factor| factor.linearize(values))
        .collect::<Result<_>>()?;
    Ok(linearized.into_iter().flatten().collect())
}
