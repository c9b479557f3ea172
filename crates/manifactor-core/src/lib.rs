//! Chart contract and variable assignment for factor-graph linearization.
//!
//! This crate provides the foundational pieces shared by every component of
//! the linearization core:
//!
//! - **Charts**: the retract / local-coordinates contract that lets
//!   manifold-valued variables take Newton-type updates in tangent-space
//!   coordinates
//! - **Keys**: totally ordered variable identifiers driving deterministic
//!   block layout
//! - **Values**: the heterogeneous assignment container the optimizer reads
//!   during linearization
//! - **Numerical validation**: finite-difference Jacobians for testing
//!   analytic derivatives
//!
//! # Error policy
//!
//! Recoverable contract errors (unknown key, wrong chart type, degenerate
//! constructor input) surface as [`CoreError`] through `Result`. Geometric
//! degeneracies (antipodal points, zero tangent steps) are *not* errors;
//! each manifold type resolves them to a documented fallback value.
//! Misuse of caller-owned output buffers asserts.
//!
//! # Modules
//!
//! - [`chart`]: Chart trait, Euclidean impls, type-erased chart values
//! - [`error`]: Error types
//! - [`key`]: Variable keys
//! - [`numerical`]: Finite-difference validation helpers
//! - [`values`]: Assignment container

pub mod chart;
pub mod error;
pub mod key;
pub mod numerical;
pub mod values;

// Re-export commonly used items at the crate root
pub use chart::{AnyChartValue, Chart};
pub use error::{CoreError, Result};
pub use key::{symbol, Key};
pub use values::Values;

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use manifactor_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::chart::{AnyChartValue, Chart};
    pub use crate::error::{CoreError, Result};
    pub use crate::key::{symbol, Key};
    pub use crate::numerical::numerical_jacobian;
    pub use crate::values::Values;
}
