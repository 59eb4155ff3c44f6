use thiserror::Error;

use crate::accel::AccelerationError;
use crate::binding::BindingError;
use crate::block::EvaluationError;
use crate::parameters::expression::ExpressionError;
use crate::parameters::parameter::ParameterError;

/// Error types for the musrfit-rs library.
#[derive(Error, Debug)]
pub enum MusrFitError {
    /// Error indicating a mismatch in vector or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Parameter/map resolution failure. Always raised during setup.
    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    /// Non-finite theory output or invalid block data.
    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Accelerated backend unavailable or diverging from the serial path.
    #[error("Acceleration error: {0}")]
    Acceleration(#[from] AccelerationError),

    /// Error for parameter-related problems.
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// FUNCTIONS-block expression could not be parsed or evaluated.
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Error indicating a singular (or not positive definite) matrix was encountered.
    #[error("Singular matrix encountered")]
    SingularMatrix,

    /// Error indicating the minimizer could not make further progress.
    #[error("Algorithm failed to converge: {0}")]
    ConvergenceFailure(String),

    /// Invalid fit configuration or command sequence.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The fit was cancelled between iterations.
    #[error("Fit cancelled")]
    Cancelled,

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic error for cases that don't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for musrfit-rs operations.
pub type Result<T> = std::result::Result<T, MusrFitError>;

impl From<String> for MusrFitError {
    fn from(s: String) -> Self {
        MusrFitError::Other(s)
    }
}

impl From<&str> for MusrFitError {
    fn from(s: &str) -> Self {
        MusrFitError::Other(s.to_string())
    }
}
