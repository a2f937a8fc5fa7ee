//! Detection error types.

use obdwatch_core::Metric;
use thiserror::Error;

/// Errors raised on the detection path (config, scaler, window, scorer).
#[derive(Debug, Error)]
pub enum AnomalyError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Scaler not fitted: call fit() before transform()")]
    NotFitted,

    #[error("Scaler already fitted: normalization parameters are fixed")]
    AlreadyFitted,

    #[error("Insufficient data: required {required}, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("Reconstruction model unavailable")]
    ModelUnavailable,

    #[error("Window has no value for {metric}")]
    IncompleteWindow { metric: Metric },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnomalyError {
    /// Errors that only mean "not scorable yet" and are skipped silently
    pub fn is_not_ready(&self) -> bool {
        matches!(self, AnomalyError::InsufficientData { .. })
    }
}

/// Result type for detection operations.
pub type Result<T> = std::result::Result<T, AnomalyError>;
