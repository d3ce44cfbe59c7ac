//! # Recognizers: the Seam to External Entity Detectors
//!
//! Regex libraries, statistical taggers and transformer pipelines all do one
//! thing from this crate's point of view: given a text, return candidate
//! spans. They live outside the crate and plug in through [`Recognizer`].
//!
//! The outcome is typed. A recognizer that ran and found nothing returns
//! `Ok(vec![])`; a recognizer that could not run returns an error. The
//! consensus merger treats both as zero votes, but only the second is
//! reported as a failed source.

use std::collections::HashMap;

use thiserror::Error;

use crate::span::Span;

/// Result of running one recognizer over one text.
pub type RecognizerOutput = Result<Vec<Span>, RecognizerError>;

/// Why a recognizer produced no usable output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognizerError {
    /// The backing model or library could not be loaded.
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),

    /// Inference raised an error.
    #[error("recognizer failed: {0}")]
    Failed(String),

    /// Inference did not finish in time.
    #[error("recognizer timed out after {0} ms")]
    Timeout(u64),

    /// No recorded output exists for this text.
    #[error("no output recorded for this text")]
    MissingOutput,
}

/// A named entity detector.
///
/// Implementations must be callable from several worker threads at once.
pub trait Recognizer: Send + Sync {
    /// Source name; must match a configured [`crate::consensus::WeightedSource`].
    fn name(&self) -> &str;

    /// Detects candidate spans in `text`.
    fn extract(&self, text: &str) -> RecognizerOutput;
}

/// Replays outputs recorded offline by an external recognizer.
///
/// Prediction files ([`crate::dataset::Predictions`]) are turned into this
/// adapter so recorded runs go through the same merge path as live ones.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedRecognizer {
    name: String,
    outputs: HashMap<String, RecognizerOutput>,
}

impl PrecomputedRecognizer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: HashMap::new(),
        }
    }

    /// Records the output for `text`, replacing any earlier one.
    pub fn insert(&mut self, text: impl Into<String>, output: RecognizerOutput) {
        self.outputs.insert(text.into(), output);
    }

    /// Recorded output for `text`, if any.
    pub fn get(&self, text: &str) -> Option<&RecognizerOutput> {
        self.outputs.get(text)
    }

    pub fn with(mut self, text: impl Into<String>, output: RecognizerOutput) -> Self {
        self.insert(text, output);
        self
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl Recognizer for PrecomputedRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, text: &str) -> RecognizerOutput {
        self.outputs
            .get(text)
            .cloned()
            .unwrap_or_else(|| Err(RecognizerError::MissingOutput))
    }
}
