//! Error Handling Module
//!
//! Defines the error taxonomy for the lesion trainer library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for lesion trainer operations
#[derive(Error, Debug)]
pub enum LesionError {
    /// An image could not be opened or decoded (fatal for the current pass)
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Dataset error
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration error, raised before training starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model construction or record error
    #[error("Model error: {0}")]
    Model(String),

    /// Training loop error
    #[error("Training error: {0}")]
    Training(String),

    /// A running metric was queried before any update
    #[error("Metric '{0}' has no observations")]
    EmptyMetric(String),

    /// Checkpoint could not be written
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience Result type for lesion trainer operations
pub type Result<T> = std::result::Result<T, LesionError>;

impl From<serde_json::Error> for LesionError {
    fn from(err: serde_json::Error) -> Self {
        LesionError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for LesionError {
    fn from(err: csv::Error) -> Self {
        LesionError::Dataset(format!("Malformed metadata table: {}", err))
    }
}
