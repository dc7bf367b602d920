//! Error types for the nodal engine.
//!
//! This module provides a unified error type [`NodalError`] that covers
//! every failure the core can report: algebraic failures of the solver,
//! Newton-Raphson and time-step control failures, topology validation
//! failures and binding/configuration errors.

use thiserror::Error;

/// Result type alias using [`NodalError`].
pub type Result<T> = std::result::Result<T, NodalError>;

/// Unified error type for all nodal operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodalError {
    // ============ Algebraic Errors ============
    /// No admissible pivot could be found during factorization.
    ///
    /// The index is the 1-based external row index of the offending
    /// equation, if it could be identified.
    #[error("Singular matrix{}", index_suffix(.index))]
    SingularMatrix { index: Option<usize> },

    /// A solve was requested before the matrix was factored.
    #[error("Solver has not been factored")]
    NotFactored,

    /// The requested operation is not available in the solver's current state.
    #[error("Invalid solver operation: {message}")]
    InvalidSolverOperation { message: String },

    // ============ Iteration Errors ============
    /// Newton-Raphson iteration did not converge.
    #[error("Newton-Raphson did not converge after {iterations} iterations (residual: {residual:.2e})")]
    ConvergenceFailure { iterations: usize, residual: f64 },

    /// The time step dropped below the configured minimum.
    #[error("Timestep too small at t = {time:.6e} s (step {step:.3e} s)")]
    TimestepTooSmall { time: f64, step: f64 },

    // ============ Topology Errors ============
    /// A node has fewer than two connections or no DC path to ground.
    #[error("Floating node '{node}' detected")]
    FloatingNode { node: String },

    /// Two independent voltage constraints were placed across the same nodes.
    #[error("Voltage loop through '{entity}' between nodes '{node_a}' and '{node_b}'")]
    VoltageLoop {
        entity: String,
        node_a: String,
        node_b: String,
    },

    /// A voltage-defining entity has both terminals on the same node.
    #[error("Short-circuited source '{entity}' on node '{node}'")]
    ShortCircuit { entity: String, node: String },

    /// A locally solved subcircuit has no linear equivalent at its pins.
    #[error("Subcircuit '{name}' has no equivalent at its pins")]
    NoEquivalentSubcircuit { name: String },

    // ============ Binding Errors ============
    /// A subcircuit instance was connected with the wrong number of nodes.
    #[error("Subcircuit '{name}' expects {expected} pins, got {actual}")]
    PinCountMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Two entities share the same name.
    #[error("Duplicate entity name '{name}'")]
    DuplicateEntity { name: String },

    /// An entity referenced by name could not be found.
    #[error("Entity '{name}' not found")]
    EntityNotFound { name: String },

    /// A required behavior was not bound for an entity.
    #[error("Entity '{entity}' has no bound {capability} behavior")]
    MissingBehavior { entity: String, capability: String },

    /// No behavior factory is registered for an entity type.
    #[error("No behavior factory registered for entity '{entity}'")]
    MissingFactory { entity: String },

    /// Invalid or missing parameter value.
    #[error("Invalid parameter '{param}' for entity '{entity}': {message}")]
    InvalidParameter {
        entity: String,
        param: String,
        message: String,
    },

    /// Invalid simulation parameter.
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },
}

fn index_suffix(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" at index {i}"),
        None => String::new(),
    }
}

impl NodalError {
    /// Create a singular matrix error for a known external index.
    pub fn singular(index: usize) -> Self {
        Self::SingularMatrix {
            index: if index == 0 { None } else { Some(index) },
        }
    }

    /// Create a convergence failure error
    pub fn convergence_failure(iterations: usize, residual: f64) -> Self {
        Self::ConvergenceFailure {
            iterations,
            residual,
        }
    }

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

    /// Create an invalid simulation parameter error
    pub fn invalid_simulation(message: impl Into<String>) -> Self {
        Self::InvalidSimulationParam {
            message: message.into(),
        }
    }

    /// Whether a caller may retry after this error (e.g. with a smaller step
    /// or a different initial guess).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConvergenceFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singular_message_carries_index() {
        let err = NodalError::singular(3);
        assert_eq!(err, NodalError::SingularMatrix { index: Some(3) });
        assert_eq!(err.to_string(), "Singular matrix at index 3");
        assert_eq!(NodalError::singular(0).to_string(), "Singular matrix");
    }

    #[test]
    fn test_only_convergence_is_recoverable() {
        assert!(NodalError::convergence_failure(10, 1.0).is_recoverable());
        assert!(!NodalError::singular(1).is_recoverable());
        assert!(!NodalError::FloatingNode { node: "a".into() }.is_recoverable());
    }
}
