//! Error types for warden core

use thiserror::Error;

/// Result type alias using TrustError
pub type Result<T> = std::result::Result<T, TrustError>;

/// Errors that can occur in trust computations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrustError {
    /// Stored score was outside the valid range
    #[error("Invalid profile state: score {score} outside [0, 150]")]
    InvalidProfileState { score: f64 },

    /// Not enough history to extrapolate a trend
    #[error("Prediction unavailable: {samples} score samples (need at least 2)")]
    PredictionUnavailable { samples: usize },

    /// Interaction signal could not be interpreted
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),
}
