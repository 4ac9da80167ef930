//! Error types for the simulation engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, SimulatorError>;

/// Errors that can occur while assembling or running a model
#[derive(Error, Debug)]
pub enum SimulatorError {
    /// API called out of lifecycle order
    #[error("Lifecycle error: {reason}")]
    Lifecycle {
        /// What was attempted out of order
        reason: String,
    },

    /// Synapse parameters reference a group that was never added
    #[error("Shape error: {reason}")]
    Shape {
        /// Reason for the shape mismatch
        reason: String,
    },

    /// Backend resource initialization or kernel setup failure
    #[error("Backend error: {reason}")]
    Backend {
        /// Underlying diagnostic
        reason: String,
    },

    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Storage layer error
    #[error("Storage error: {source}")]
    Storage {
        #[from]
        /// Source storage error
        source: spikeline_storage::StorageError,
    },
}

impl SimulatorError {
    /// Create a lifecycle error
    pub fn lifecycle(reason: impl Into<String>) -> Self {
        Self::Lifecycle {
            reason: reason.into(),
        }
    }

    /// Create a shape error
    pub fn shape(reason: impl Into<String>) -> Self {
        Self::Shape {
            reason: reason.into(),
        }
    }

    /// Create a backend error
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SimulatorError::lifecycle("timestep set after synapses exist");
        assert!(matches!(err, SimulatorError::Lifecycle { .. }));

        let err = SimulatorError::invalid_parameter("delay", "0", ">= 1");
        assert!(matches!(err, SimulatorError::InvalidParameter { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = SimulatorError::shape("presynaptic group G7 was never added");
        let msg = format!("{}", err);
        assert!(msg.contains("G7"));
    }
}
