//! Structured error types for model construction.

use thiserror::Error;

/// Errors raised while assembling a model graph.
///
/// Sampling itself never fails: runtime domain violations are expressed as
/// `-inf` log-densities and resolved by the Metropolis test.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A node or hyperparameter was configured inconsistently
    /// (non-positive-definite matrix, invalid bounds, bad parent handle).
    #[error("configuration error: {0}")]
    Config(String),

    /// A value payload and a hyperparameter disagree on shape.
    #[error("shape mismatch: {0}")]
    Shape(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ModelError>;
