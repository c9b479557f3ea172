//! Differentiable expressions and linearizing factors over manifold charts.
//!
//! This crate turns measurement functions over manifold-valued variables
//! into block-sparse linear factors consumable by a least-squares solver:
//!
//! 1. An [`Expression`] composes operations over leaves identified by
//!    variable keys; evaluating it yields the predicted value and, on
//!    request, one chain-rule Jacobian block per leaf.
//! 2. An [`ExpressionFactor`] binds an expression to a measurement and a
//!    noise model; [`ExpressionFactor::linearize`] produces the
//!    [`LinearFactor`] holding ordered Jacobian blocks and the negated
//!    residual.
//!
//! # Modules
//!
//! - [`expression`]: Expression trees and Jacobian maps
//! - [`factor`]: Linearizing factors and parallel linearization
//! - [`linear`]: The block-sparse linear factor
//! - [`noise`]: Noise model interface

pub mod expression;
pub mod factor;
pub mod linear;
pub mod noise;

// Re-export key types
pub use expression::{Expression, JacobianMap, JacobianSlot};
pub use factor::{linearize_all, ActivityPredicate, ExpressionFactor};
pub use linear::LinearFactor;
pub use noise::{Constrained, Isotropic, NoiseModel};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::expression::{Expression, JacobianMap, JacobianSlot};
    pub use crate::factor::{linearize_all, ExpressionFactor};
    pub use crate::linear::LinearFactor;
    pub use crate::noise::{Constrained, Isotropic, NoiseModel};
    pub use manifactor_core::prelude::*;
}
