//! The chart contract shared by every manifold-valued variable type.
//!
//! A *chart* gives a manifold point a local Euclidean coordinate system: a
//! fixed tangent dimension, a [`retract`](Chart::retract) map taking a tangent
//! vector at the point back onto the manifold, and a
//! [`local_coordinates`](Chart::local_coordinates) map that is its approximate
//! inverse. Newton-type optimizers only ever touch variables through these
//! two maps, which is what lets non-Euclidean state (unit directions,
//! rotations, poses) participate in linear updates.
//!
//! Plain Euclidean types conform trivially: retraction is vector addition and
//! local coordinates are subtraction. Implementations for `f64` and
//! [`DVector<f64>`] are provided here so scalar- and vector-valued
//! measurements plug into the same machinery.

use crate::error::{CoreError, Result};
use nalgebra::DVector;
use std::any::Any;

/// Local-coordinate chart for a manifold-valued type.
///
/// # Contract laws
///
/// Every conforming type must satisfy, to numerical tolerance:
///
/// - `local_coordinates(retract(v)) == v` for every `v` in a neighborhood of
///   zero where the chart is invertible (round-trip law);
/// - `retract(local_coordinates(other)) == other` for every `other` that is
///   not singular (e.g. antipodal) relative to `self`;
/// - `retract(0) == self`.
///
/// Singular inputs must resolve to a documented fallback value, never NaN.
pub trait Chart: Clone {
    /// The tangent dimension of this value.
    ///
    /// Fixed for the lifetime of the value; tangent vectors passed to
    /// [`retract`](Chart::retract) must have exactly this length.
    fn dimension(&self) -> usize;

    /// Maps a tangent vector at `self` to a new point on the manifold.
    fn retract(&self, v: &DVector<f64>) -> Self;

    /// Computes the tangent vector at `self` pointing towards `other`.
    ///
    /// Approximate inverse of [`retract`](Chart::retract).
    fn local_coordinates(&self, other: &Self) -> DVector<f64>;
}

impl Chart for f64 {
    fn dimension(&self) -> usize {
        1
    }

    fn retract(&self, v: &DVector<f64>) -> Self {
        self + v[0]
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        DVector::from_element(1, other - self)
    }
}

impl Chart for DVector<f64> {
    fn dimension(&self) -> usize {
        self.len()
    }

    fn retract(&self, v: &DVector<f64>) -> Self {
        self + v
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        other - self
    }
}

/// Object-safe mirror of [`Chart`], for heterogeneous storage.
///
/// An assignment container holds variables of many different chart types
/// behind `Box<dyn AnyChartValue>`; typed access goes through
/// [`as_any`](AnyChartValue::as_any) downcasting. A blanket implementation
/// covers every `Chart` type, so manifold types never implement this trait
/// directly.
pub trait AnyChartValue: Send + Sync {
    /// Tangent dimension of the stored value.
    fn dimension(&self) -> usize;

    /// Type-erased [`Chart::retract`].
    fn retract_dyn(&self, v: &DVector<f64>) -> Box<dyn AnyChartValue>;

    /// Type-erased [`Chart::local_coordinates`].
    ///
    /// # Panics
    ///
    /// Panics if `other` is not of the same concrete type as `self`; mixing
    /// chart types is caller misuse, not a recoverable condition.
    fn local_coordinates_dyn(&self, other: &dyn AnyChartValue) -> DVector<f64>;

    /// Clones the value behind the trait object.
    fn clone_box(&self) -> Box<dyn AnyChartValue>;

    /// Upcast for downcasting to the concrete chart type.
    fn as_any(&self) -> &dyn Any;
}

impl<T> AnyChartValue for T
where
    T: Chart + Send + Sync + 'static,
{
    fn dimension(&self) -> usize {
        Chart::dimension(self)
    }

    fn retract_dyn(&self, v: &DVector<f64>) -> Box<dyn AnyChartValue> {
        Box::new(self.retract(v))
    }

    fn local_coordinates_dyn(&self, other: &dyn AnyChartValue) -> DVector<f64> {
        let other = other
            .as_any()
            .downcast_ref::<T>()
            .expect("local_coordinates between different chart types");
        self.local_coordinates(other)
    }

    fn clone_box(&self) -> Box<dyn AnyChartValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Clone for Box<dyn AnyChartValue> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Downcasts an erased chart value to a concrete type.
///
/// Returns [`CoreError::TypeMismatch`] tagged with `key` if the stored type
/// differs from `T`.
pub fn downcast_chart<T: Chart + 'static>(
    value: &dyn AnyChartValue,
    key: crate::key::Key,
) -> Result<&T> {
    value
        .as_any()
        .downcast_ref::<T>()
        .ok_or(CoreError::type_mismatch(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scalar_chart_round_trip() {
        let x = 2.5_f64;
        let v = DVector::from_element(1, 0.75);
        let y = x.retract(&v);
        assert_relative_eq!(y, 3.25, epsilon = 1e-12);
        assert_relative_eq!(x.local_coordinates(&y)[0], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_vector_chart_round_trip() {
        let x = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let v = DVector::from_vec(vec![0.1, 0.2, -0.3]);
        let y = x.retract(&v);
        assert_relative_eq!(x.local_coordinates(&y), v, epsilon = 1e-12);
    }

    #[test]
    fn test_retract_zero_is_identity() {
        let x = DVector::from_vec(vec![4.0, 5.0]);
        let zero = DVector::zeros(2);
        assert_relative_eq!(x.retract(&zero), x, epsilon = 1e-15);
    }

    #[test]
    fn test_erased_chart_dispatch() {
        let boxed: Box<dyn AnyChartValue> = Box::new(DVector::from_vec(vec![1.0, 2.0]));
        assert_eq!(boxed.dimension(), 2);

        let moved = boxed.retract_dyn(&DVector::from_vec(vec![1.0, 1.0]));
        let delta = boxed.local_coordinates_dyn(moved.as_ref());
        assert_relative_eq!(delta[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(delta[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    #[should_panic(expected = "different chart types")]
    fn test_erased_chart_type_confusion() {
        let a: Box<dyn AnyChartValue> = Box::new(1.0_f64);
        let b: Box<dyn AnyChartValue> = Box::new(DVector::from_vec(vec![1.0]));
        a.local_coordinates_dyn(b.as_ref());
    }
}
