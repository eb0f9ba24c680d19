use std::path::PathBuf;
use thiserror::Error;

/// A result type for monitoring
pub type Result<T> = std::result::Result<T, MonitorError>;

/// An error raised while configuring or running a monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    /// When configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfigError(String),
    /// When a sink is already open on the location
    #[error("A sink is already open at {0:?}")]
    SinkInUse(PathBuf),
    /// When a closed sink is written to
    #[error("Sink at {0:?} is closed")]
    SinkClosed(PathBuf),
    /// When the monitor is used after its closure
    #[error("Monitor is closed")]
    MonitorClosed,
    /// When the model parameter set changed since the recorder creation
    #[error("Model structure changed: expected {expected:?}, got {actual:?}")]
    ModelStructureChanged {
        /// Signature recorded at creation
        expected: Vec<(String, usize)>,
        /// Current signature
        actual: Vec<(String, usize)>,
    },
    /// When a shared handle lock was poisoned by a panicking holder
    #[error("Poisoned lock: {0}")]
    PoisonedError(String),
    /// When a parameter store or an optimizer fails
    #[error(transparent)]
    OptimError(#[from] gpmon_optim::OptimError),
    /// When IO fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    /// When (de)serialization fails
    #[error("Json error")]
    JsonError(#[from] serde_json::Error),
    /// When numpy array write fails
    #[error("IO error")]
    WriteNpyError(#[from] ndarray_npy::WriteNpyError),
    /// When numpy array read fails
    #[error("IO error")]
    ReadNpyError(#[from] ndarray_npy::ReadNpyError),
    /// When a user defined task fails
    #[error(transparent)]
    TaskError(#[from] anyhow::Error),
}

impl<T> From<std::sync::PoisonError<T>> for MonitorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MonitorError::PoisonedError(err.to_string())
    }
}
