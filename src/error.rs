//! Error types for the nodal circuit simulator.
//!
//! This module provides a unified error type [`SimError`] that covers
//! every condition which escapes an analysis: topology problems found while
//! binding devices, parameter validation failures and numeric failures that
//! survived every fallback strategy.
//!
//! Numeric trouble inside a Newton loop is *not* reported through this type.
//! The loop returns a [`SolveStatus`](crate::solver::SolveStatus) and the
//! drivers decide whether to retry.

use thiserror::Error;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Unified error type for all simulator operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    // ============ Topology Errors ============
    /// A device was connected to the wrong number of nodes
    #[error("{device}: Node count mismatch. {given} given, {expected} expected.")]
    PinCountMismatch {
        device: String,
        given: usize,
        expected: usize,
    },

    /// Node not found in circuit
    #[error("Node '{node}' not found in circuit")]
    NodeNotFound { node: String },

    /// Undefined model reference
    #[error("Undefined model '{model}' referenced by device '{device}'")]
    ModelNotFound { model: String, device: String },

    /// Model exists but is of the wrong kind
    #[error("Model '{model}' referenced by device '{device}' is not a {expected} model")]
    ModelTypeMismatch {
        model: String,
        device: String,
        expected: &'static str,
    },

    /// A current-controlled device names a voltage source that does not exist
    #[error("{device}: Could not find voltage source '{vsource}'")]
    ControllingSourceNotFound { vsource: String, device: String },

    /// Duplicate device or model name
    #[error("Duplicate entity name '{name}'")]
    DuplicateEntity { name: String },

    /// No device or model with this name
    #[error("Entity '{name}' not found in circuit")]
    EntityNotFound { name: String },

    // ============ Parameter Errors ============
    /// Parameter name not present in the entity's table
    #[error("Unknown parameter '{param}' for '{entity}'")]
    UnknownParameter { entity: String, param: String },

    /// Invalid parameter value
    #[error("Invalid parameter '{param}' for '{entity}': {message}")]
    InvalidParameter {
        entity: String,
        param: String,
        message: String,
    },

    /// Initial condition vector of the wrong length
    #[error("{device}: Initial condition vector has {given} values, {expected} expected")]
    InvalidInitialConditions {
        device: String,
        given: usize,
        expected: usize,
    },

    // ============ Simulation Errors ============
    /// Matrix is singular and cannot be solved
    #[error("Singular matrix: zero pivot at row {row}, column {col}")]
    SingularMatrix { row: usize, col: usize },

    /// Newton-Raphson iteration did not converge after every fallback
    #[error("{analysis}: iteration did not converge after {iterations} iterations")]
    ConvergenceFailure {
        analysis: &'static str,
        iterations: usize,
    },

    /// Transient step control shrank the timestep below its minimum
    #[error("Timestep too small at t = {time:.6e}s (delta = {delta:.3e}s)")]
    TimestepTooSmall { time: f64, delta: f64 },

    /// Invalid analysis setup
    #[error("Invalid analysis: {message}")]
    InvalidAnalysis { message: String },
}

impl SimError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(
        entity: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            entity: entity.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create an unknown parameter error
    pub fn unknown_parameter(entity: impl Into<String>, param: impl Into<String>) -> Self {
        Self::UnknownParameter {
            entity: entity.into(),
            param: param.into(),
        }
    }

    /// Create a convergence failure error
    pub fn convergence_failure(analysis: &'static str, iterations: usize) -> Self {
        Self::ConvergenceFailure {
            analysis,
            iterations,
        }
    }

    /// Create an invalid analysis error
    pub fn invalid_analysis(message: impl Into<String>) -> Self {
        Self::InvalidAnalysis {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_count_message_names_device() {
        let err = SimError::PinCountMismatch {
            device: "R1".to_string(),
            given: 3,
            expected: 2,
        };
        assert_eq!(
            err.to_string(),
            "R1: Node count mismatch. 3 given, 2 expected."
        );
    }

    #[test]
    fn test_helper_constructors() {
        let err = SimError::invalid_parameter("D1", "n", "must be positive");
        assert!(matches!(err, SimError::InvalidParameter { .. }));
        assert!(err.to_string().contains("D1"));
    }
}
