//! Error types for proxadmm.

use thiserror::Error;

use crate::array::Shape;

/// Errors raised by operator algebra, functionals and the ADMM solver.
///
/// Every variant is fatal to the call that produced it. Non-convergence of an
/// inner linear solve is not an error; it is recorded in the iteration
/// statistics instead.
#[derive(Debug, Error)]
pub enum ADMMError {
    /// Inconsistent solver or operator configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operand shapes do not agree.
    #[error("Shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: String,
        expected: Shape,
        got: Shape,
    },

    /// Wrong operand kind or dtype.
    #[error("Type error: {0}")]
    Type(String),

    /// A numerical failure that prevents the iteration from continuing.
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Failure at the boundary to an opaque external routine.
    #[error("External call error: {0}")]
    ExternalCall(String),

    /// The requested operation is not provided by this object.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl ADMMError {
    pub(crate) fn shape(context: impl Into<String>, expected: &Shape, got: &Shape) -> Self {
        ADMMError::ShapeMismatch {
            context: context.into(),
            expected: expected.clone(),
            got: got.clone(),
        }
    }
}

/// Result type for proxadmm operations.
pub type Result<T> = std::result::Result<T, ADMMError>;
