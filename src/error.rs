//! Error taxonomy shared by the evaluation engine, the fit driver and the CLI.
//!
//! Convergence failures are *not* errors: a fit that ends with a non-OK
//! minimizer status still produces a full [`crate::fit::BestFitResult`].

use thiserror::Error;

/// Library error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// Caller bug: duplicate names, unknown names, bad data shapes, out-of-bounds
    /// parameters, empty free-parameter set.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Detected mid-evaluation (NaN parameter values, inconsistent buffer sizes).
    #[error("Numeric error: {0}")]
    Numeric(String),

    /// The minimizer backend could not be set up or run.
    #[error("Minimizer error: {0}")]
    Minimizer(String),
}

impl FitError {
    pub fn config(message: impl Into<String>) -> Self {
        FitError::Configuration(message.into())
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        FitError::Numeric(message.into())
    }

    pub fn minimizer(message: impl Into<String>) -> Self {
        FitError::Minimizer(message.into())
    }

    /// Process exit code used by the `compfit` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::Configuration(_) => 2,
            FitError::Numeric(_) => 4,
            FitError::Minimizer(_) => 5,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FitError>;
