//! Manifold chart implementations for factor-graph linearization.
//!
//! Each type in this crate implements the
//! [`Chart`](manifactor_core::Chart) contract from `manifactor-core` and
//! additionally exposes its geometric primitives with optional analytic
//! derivatives, so it can serve both as an optimization variable and as a
//! building block inside differentiable expressions.
//!
//! Currently provided:
//!
//! - [`UnitDirection`]: a point on the unit sphere S^2 (bearings, normals),
//!   with a memoized orthonormal tangent basis.

pub mod unit_direction;

pub use unit_direction::{UnitDirection, CHART_TOLERANCE};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::unit_direction::UnitDirection;
    pub use manifactor_core::prelude::*;
}
