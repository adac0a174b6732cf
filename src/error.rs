//! Error types.
//!
//! Only conditions that stop a run before it starts (or stop an I/O helper) are errors.
//! Numerical trouble inside a run is reported as data: see
//! [`Infeasible`](crate::density::Infeasible) and [`Divergence`](crate::trace::Divergence).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamplerError {
    /// Invalid sampler configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The initial position is outside the support of the target.
    #[error("Initial position rejected: {0}")]
    InitialPosition(String),

    /// A vector or matrix did not have the expected dimension.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    /// Invalid model data or parameters.
    #[error("Model error: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SamplerError>;
