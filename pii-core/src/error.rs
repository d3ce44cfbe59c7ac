//! Error types for pii-core.
//!
//! Degenerate metric divisions are not errors: precision, recall and F1 over
//! empty denominators are defined as `0.0` in [`crate::metrics`].

use thiserror::Error;

use crate::span::SpanError;

/// Result type for pii-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pii-core operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A span failed boundary validation.
    #[error("Invalid span: {0}")]
    InvalidSpan(#[from] SpanError),

    /// Configuration values out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A recognizer produced output but has no configured weight.
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// Every configured recognizer failed for the same text.
    #[error("No recognizer produced output ({failed} failed)")]
    NoRecognizerAvailable {
        /// Number of sources that failed
        failed: usize,
    },

    /// Spans handed to a splicing consumer overlap each other.
    #[error("Overlapping spans at [{first_start}, {first_end}) and [{second_start}, {second_end})")]
    OverlappingSpans {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },

    /// Dataset or predictions file has an unexpected shape.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV report error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// Create a dataset error.
    pub fn dataset(msg: impl Into<String>) -> Self {
        Error::Dataset(msg.into())
    }
}
