//! Error types for chart and assignment operations.
//!
//! This module defines the core error type used throughout the library.
//! Only *recoverable* contract errors are represented here; precondition
//! violations on caller-owned output buffers are fatal and assert instead
//! (see the crate-level documentation on error policy).

use crate::key::Key;
use thiserror::Error;

/// Errors that can occur during chart and assignment operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Point cannot be placed on the manifold.
    ///
    /// This error occurs when a constructor input fails to satisfy the
    /// manifold constraints, e.g. normalizing a zero-length vector.
    #[error("Point is not on the manifold: {reason}")]
    InvalidPoint {
        /// Description of why the point is invalid
        reason: String,
    },

    /// Dimension mismatch between vectors or matrix blocks.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions
        expected: String,
        /// Actual dimensions
        actual: String,
    },

    /// A variable key was not present in the assignment.
    ///
    /// Looking up an unknown key is caller misuse; the current operation is
    /// aborted without a partial result.
    #[error("Unknown variable key: {key}")]
    UnknownKey {
        /// The key that was requested
        key: Key,
    },

    /// A variable was stored under a different chart type than requested.
    #[error("Stored value under key {key} has a different chart type")]
    TypeMismatch {
        /// The key whose value had an unexpected type
        key: Key,
    },
}

impl CoreError {
    /// Create an `InvalidPoint` error with a custom reason.
    pub fn invalid_point<S: Into<String>>(reason: S) -> Self {
        Self::InvalidPoint {
            reason: reason.into(),
        }
    }

    /// Create a `DimensionMismatch` error.
    pub fn dimension_mismatch<S1, S2>(expected: S1, actual: S2) -> Self
    where
        S1: std::fmt::Display,
        S2: std::fmt::Display,
    {
        Self::DimensionMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an `UnknownKey` error.
    pub fn unknown_key(key: Key) -> Self {
        Self::UnknownKey { key }
    }

    /// Create a `TypeMismatch` error.
    pub fn type_mismatch(key: Key) -> Self {
        Self::TypeMismatch { key }
    }
}

/// Result type alias for chart and assignment operations.
pub type Result<T> = std::result::Result<T, CoreError>;
