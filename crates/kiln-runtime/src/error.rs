//! Error types for the runtime crate.

use thiserror::Error;

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Device or worker initialization failed.
    #[error("Initialization failed: {0}")]
    InitError(String),

    /// A device-runtime call failed (lost device, invalid queue, ...).
    #[error("Device error: {0}")]
    Device(String),

    /// No execution provider can run a node.
    #[error("No execution provider: {0}")]
    NoProvider(String),

    /// A kernel failed while running.
    #[error("Execution failed: {0}")]
    ExecutionError(String),

    /// Tensor not found.
    #[error("Tensor not found: {0}")]
    TensorNotFound(String),

    /// Invalid input/output.
    #[error("Invalid input or output: {0}")]
    InvalidInputOutput(String),

    /// Graph or registry error.
    #[error(transparent)]
    Core(#[from] kiln_core::Error),
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
