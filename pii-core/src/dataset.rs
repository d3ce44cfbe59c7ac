//! # Datasets and Prediction Files
//!
//! ## Dataset
//!
//! ```json
//! {
//!   "metadata": { ... },
//!   "dialogs": [
//!     { "id": 1, "text": "...", "entities": [ { "start": 0, "end": 4, "type": "PERSON", "text": "Иван" } ] }
//!   ]
//! }
//! ```
//!
//! Older generated files name the list `personal_data` and the text field
//! `value`; both are accepted. Ids may be numbers or strings; a missing id
//! becomes the 1-based position of the dialog.
//!
//! Every entity passes [`Span::validate_lenient`]. Rejected entities are logged
//! and counted in [`Dataset::invalid_spans`], never kept.
//!
//! ## Predictions
//!
//! One file per recognizer, produced offline:
//!
//! ```json
//! { "source": "bert", "dialogs": [ { "id": 1, "entities": [...] }, { "id": 2, "error": "CUDA OOM" } ] }
//! ```
//!
//! [`Predictions::to_recognizer`] replays a file through the [`Recognizer`]
//! seam. Dialogs absent from the file surface as
//! [`RecognizerError::MissingOutput`].
//!
//! [`Recognizer`]: crate::recognizer::Recognizer

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::recognizer::{PrecomputedRecognizer, RecognizerError};
use crate::span::{RawSpan, Span};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    RawId::deserialize(deserializer).map(RawId::into_string)
}

#[derive(Deserialize)]
struct RawDataset {
    #[serde(default)]
    metadata: serde_json::Value,
    dialogs: Vec<RawDialog>,
}

#[derive(Deserialize)]
struct RawDialog {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    text: String,
    #[serde(default, alias = "personal_data")]
    entities: Vec<RawSpan>,
}

/// One annotated text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dialog {
    pub id: String,
    pub text: String,
    /// Validated ground-truth spans
    pub entities: Vec<Span>,
}

impl Dialog {
    /// Whether the dialog contains personal data at all.
    pub fn has_pd(&self) -> bool {
        !self.entities.is_empty()
    }
}

/// A loaded, validated dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub metadata: serde_json::Value,
    pub dialogs: Vec<Dialog>,
    /// Entities dropped during validation
    pub invalid_spans: usize,
}

/// Summary counts over a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub total_dialogs: usize,
    pub pd_dialogs: usize,
    pub non_pd_dialogs: usize,
    pub pd_percentage: f64,
    pub total_entities: usize,
    pub entity_types: BTreeMap<String, usize>,
}

impl Dataset {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let dataset = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            dialogs = dataset.dialogs.len(),
            invalid_spans = dataset.invalid_spans,
            "loaded dataset"
        );
        Ok(dataset)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawDataset = serde_json::from_str(json)?;

        let mut seen = HashSet::new();
        let mut invalid_spans = 0;
        let mut dialogs = Vec::with_capacity(raw.dialogs.len());
        for (idx, dialog) in raw.dialogs.into_iter().enumerate() {
            let id = dialog
                .id
                .map(RawId::into_string)
                .unwrap_or_else(|| (idx + 1).to_string());
            if !seen.insert(id.clone()) {
                return Err(Error::dataset(format!("duplicate dialog id '{id}'")));
            }

            let (entities, dropped) = validate_all(&id, &dialog.entities, &dialog.text);
            invalid_spans += dropped;
            dialogs.push(Dialog {
                id,
                text: dialog.text,
                entities,
            });
        }

        Ok(Self {
            metadata: raw.metadata,
            dialogs,
            invalid_spans,
        })
    }

    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Dialog> {
        self.dialogs.iter().find(|d| d.id == id)
    }

    pub fn stats(&self) -> DatasetStats {
        let total_dialogs = self.dialogs.len();
        let pd_dialogs = self.dialogs.iter().filter(|d| d.has_pd()).count();

        let mut entity_types = BTreeMap::new();
        for span in self.dialogs.iter().flat_map(|d| &d.entities) {
            *entity_types.entry(span.entity_type.clone()).or_insert(0) += 1;
        }

        DatasetStats {
            total_dialogs,
            pd_dialogs,
            non_pd_dialogs: total_dialogs - pd_dialogs,
            pd_percentage: if total_dialogs == 0 {
                0.0
            } else {
                pd_dialogs as f64 / total_dialogs as f64 * 100.0
            },
            total_entities: entity_types.values().sum(),
            entity_types,
        }
    }
}

/// Validates `raw` against `text`, dropping and logging what fails.
fn validate_all(dialog_id: &str, raw: &[RawSpan], text: &str) -> (Vec<Span>, usize) {
    let mut dropped = 0;
    let spans = raw
        .iter()
        .filter_map(|r| match Span::validate_lenient(r, text) {
            Ok(span) => Some(span),
            Err(err) => {
                warn!(dialog = %dialog_id, start = r.start, end = r.end, "dropping invalid span: {err}");
                dropped += 1;
                None
            }
        })
        .collect();
    (spans, dropped)
}

/// One dialog's entry in a predictions file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedDialog {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<RawSpan>>,
    /// Why the recognizer produced nothing for this dialog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Recorded output of one recognizer over a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predictions {
    pub source: String,
    pub dialogs: Vec<PredictedDialog>,
}

impl Predictions {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dialogs: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let predictions = Self::from_json(&fs::read_to_string(path)?)?;
        info!(
            path = %path.display(),
            source = %predictions.source,
            dialogs = predictions.dialogs.len(),
            "loaded predictions"
        );
        Ok(predictions)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let predictions: Self = serde_json::from_str(json)?;
        if predictions.source.trim().is_empty() {
            return Err(Error::dataset("predictions file has an empty source name"));
        }
        Ok(predictions)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn push_spans(&mut self, id: impl Into<String>, spans: &[Span]) {
        self.dialogs.push(PredictedDialog {
            id: id.into(),
            entities: Some(spans.iter().map(RawSpan::from).collect()),
            error: None,
        });
    }

    pub fn push_error(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.dialogs.push(PredictedDialog {
            id: id.into(),
            entities: None,
            error: Some(reason.into()),
        });
    }

    /// Validated spans for every dialog of `dataset`, by dialog id.
    ///
    /// Entries with an `error` map to [`RecognizerError::Failed`]; dialogs the
    /// file does not mention map to [`RecognizerError::MissingOutput`].
    pub fn outputs_for(&self, dataset: &Dataset) -> BTreeMap<String, std::result::Result<Vec<Span>, RecognizerError>> {
        let mut by_id = BTreeMap::new();
        for entry in &self.dialogs {
            let Some(dialog) = dataset.get(&entry.id) else {
                warn!(source = %self.source, dialog = %entry.id, "prediction for unknown dialog ignored");
                continue;
            };
            let output = match (&entry.error, &entry.entities) {
                (Some(reason), _) => Err(RecognizerError::Failed(reason.clone())),
                (None, Some(raw)) => Ok(validate_all(&dialog.id, raw, &dialog.text).0),
                (None, None) => Err(RecognizerError::MissingOutput),
            };
            by_id.insert(entry.id.clone(), output);
        }
        for dialog in &dataset.dialogs {
            by_id
                .entry(dialog.id.clone())
                .or_insert(Err(RecognizerError::MissingOutput));
        }
        by_id
    }

    /// Replays the file as a recognizer keyed by dialog text.
    ///
    /// Dialogs sharing a text share one output: the first dialog's entry is
    /// kept and a conflicting later entry is logged and ignored.
    pub fn to_recognizer(&self, dataset: &Dataset) -> PrecomputedRecognizer {
        let mut outputs = self.outputs_for(dataset);
        let mut recognizer = PrecomputedRecognizer::new(self.source.clone());
        for dialog in &dataset.dialogs {
            let Some(output) = outputs.remove(&dialog.id) else {
                continue;
            };
            let conflicts = recognizer.get(&dialog.text).map(|existing| *existing != output);
            match conflicts {
                None => recognizer.insert(dialog.text.clone(), output),
                Some(true) => warn!(
                    source = %self.source,
                    dialog = %dialog.id,
                    "same text as an earlier dialog but a different output, keeping the earlier one"
                ),
                Some(false) => {}
            }
        }
        recognizer
    }
}
