use thiserror::Error;

/// A result type for optimization collaborators
pub type Result<T> = std::result::Result<T, OptimError>;

/// An error raised by parameter stores and optimizers
#[derive(Error, Debug)]
pub enum OptimError {
    /// When configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfigError(String),
    /// When an invalid value is encountered
    #[error("Value error: {0}")]
    InvalidValue(String),
    /// When a parameter name is not registered in the store
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    /// When a new value does not match the registered parameter shape
    #[error("Shape mismatch for {name}: expected {expected} values, got {actual}")]
    ShapeMismatch {
        /// Parameter name (or `trainable` for the flattened vector)
        name: String,
        /// Expected number of values
        expected: usize,
        /// Given number of values
        actual: usize,
    },
    /// When a shared handle lock was poisoned by a panicking holder
    #[error("Poisoned lock: {0}")]
    PoisonedError(String),
    /// When (de)serialization of an optimizer state fails
    #[error("Json error")]
    JsonError(#[from] serde_json::Error),
    /// When the optimization loop is aborted by its callback or by argmin
    #[error("Optimization aborted: {0}")]
    Aborted(#[from] anyhow::Error),
}

impl<T> From<std::sync::PoisonError<T>> for OptimError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        OptimError::PoisonedError(err.to_string())
    }
}
