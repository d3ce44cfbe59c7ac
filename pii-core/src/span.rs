//! # Spans: Entity Intervals over a Fixed Source Text
//!
//! A [`Span`] is the unit every component of the crate consumes: a half-open
//! interval `[start, end)` of **character** offsets tagged with an entity type
//! and the literal text it covers.
//!
//! ## Why characters and not bytes
//!
//! The dialogs are Russian: every Cyrillic letter takes two bytes in UTF-8,
//! while annotators and recognizers count characters. All offsets here are
//! Unicode scalar offsets; [`char_slice`] converts them once when the text is
//! needed.
//!
//! ## Validation at the boundary
//!
//! Spans arrive from JSON as [`RawSpan`] (signed offsets, optional text) and
//! become [`Span`] only through [`Span::validate`] or [`Span::validate_lenient`].
//! Once validated, nothing downstream re-checks them.
//!
//! | Check                         | Error                        |
//! |-------------------------------|------------------------------|
//! | `start < 0` or `end < 0`      | [`SpanError::NegativeOffset`] |
//! | `end <= start`                | [`SpanError::Empty`]          |
//! | `end > chars(source)`         | [`SpanError::OutOfBounds`]    |
//! | no `text` / `value`           | [`SpanError::MissingText`]    |
//! | `text != source[start..end]`  | [`SpanError::TextMismatch`]   |

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PERSON: &str = "PERSON";
pub const PHONE: &str = "PHONE";
pub const EMAIL: &str = "EMAIL";
pub const AGE: &str = "AGE";
pub const ADDRESS: &str = "ADDRESS";
pub const ORGANIZATION: &str = "ORGANIZATION";
pub const LOCATION: &str = "LOCATION";
pub const SNILS: &str = "SNILS";
pub const INN: &str = "INN";
pub const PASSPORT: &str = "PASSPORT";
pub const BANK_CARD: &str = "BANK_CARD";

/// A validated entity span.
///
/// # Example
/// In `"Меня зовут Иван"`, the name is
/// `Span { start: 11, end: 15, entity_type: "PERSON", text: "Иван" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Character offset of the first char (inclusive)
    pub start: usize,
    /// Character offset past the last char (exclusive)
    pub end: usize,
    /// Entity type tag (free-form: `PERSON`, `PHONE`, `SNILS`, ...)
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Exact source substring at `[start, end)`
    pub text: String,
}

/// The `(start, end, type)` identity of a span.
///
/// Used as the dedup key by the matcher and the vote key by the merger.
/// Ordering is lexicographic on `(start, end, entity_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanKey {
    pub start: usize,
    pub end: usize,
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// Untrusted span shape as found in dataset and prediction files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSpan {
    pub start: i64,
    pub end: i64,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Legacy alias for `text` used by older generated datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Reasons a [`RawSpan`] is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpanError {
    #[error("negative offset in [{start}, {end})")]
    NegativeOffset { start: i64, end: i64 },

    #[error("empty or inverted interval [{start}, {end})")]
    Empty { start: usize, end: usize },

    #[error("end {end} beyond source length {len}")]
    OutOfBounds { end: usize, len: usize },

    #[error("span [{start}, {end}) carries no text")]
    MissingText { start: usize, end: usize },

    #[error("text {stated:?} does not match source {actual:?}")]
    TextMismatch { stated: String, actual: String },
}

impl Span {
    /// Builds a span without checking it against a source.
    ///
    /// Meant for recognizer adapters that already derive `text` from the
    /// source they scanned.
    pub fn new(start: usize, end: usize, entity_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            entity_type: entity_type.into(),
            text: text.into(),
        }
    }

    /// Builds a span whose text is read from `source`.
    pub fn from_source(source: &str, start: usize, end: usize, entity_type: impl Into<String>) -> Result<Self, SpanError> {
        if end <= start {
            return Err(SpanError::Empty { start, end });
        }
        let text = char_slice(source, start, end).ok_or(SpanError::OutOfBounds {
            end,
            len: char_len(source),
        })?;
        Ok(Self::new(start, end, entity_type, text))
    }

    /// Strict validation: the stated text must equal the source substring.
    pub fn validate(raw: &RawSpan, source: &str) -> Result<Self, SpanError> {
        Self::check(raw, source, false)
    }

    /// Validation with whitespace-trim repair.
    ///
    /// When `source[start..end].trim() == text.trim()` the span is accepted
    /// and its text replaced by the exact source substring. Coordinates are
    /// never moved.
    pub fn validate_lenient(raw: &RawSpan, source: &str) -> Result<Self, SpanError> {
        Self::check(raw, source, true)
    }

    fn check(raw: &RawSpan, source: &str, repair: bool) -> Result<Self, SpanError> {
        if raw.start < 0 || raw.end < 0 {
            return Err(SpanError::NegativeOffset { start: raw.start, end: raw.end });
        }
        let (start, end) = (raw.start as usize, raw.end as usize);
        if end <= start {
            return Err(SpanError::Empty { start, end });
        }
        let len = char_len(source);
        let actual = char_slice(source, start, end).ok_or(SpanError::OutOfBounds { end, len })?;
        let stated = raw
            .text
            .as_deref()
            .or(raw.value.as_deref())
            .ok_or(SpanError::MissingText { start, end })?;

        if stated != actual && !(repair && stated.trim() == actual.trim()) {
            return Err(SpanError::TextMismatch {
                stated: stated.to_string(),
                actual: actual.to_string(),
            });
        }

        Ok(Self::new(start, end, raw.entity_type.clone(), actual))
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn key(&self) -> SpanKey {
        SpanKey {
            start: self.start,
            end: self.end,
            entity_type: self.entity_type.clone(),
        }
    }

    /// Any-type overlap on the character axis.
    pub fn overlaps(&self, other: &Span) -> bool {
        spans_overlap(self.start, self.end, other.start, other.end)
    }
}

impl From<&Span> for RawSpan {
    fn from(span: &Span) -> Self {
        Self {
            start: span.start as i64,
            end: span.end as i64,
            entity_type: span.entity_type.clone(),
            text: Some(span.text.clone()),
            value: None,
        }
    }
}

impl SpanKey {
    pub fn new(start: usize, end: usize, entity_type: impl Into<String>) -> Self {
        Self {
            start,
            end,
            entity_type: entity_type.into(),
        }
    }
}

impl From<&Span> for SpanKey {
    fn from(span: &Span) -> Self {
        span.key()
    }
}

/// Half-open interval intersection test: `!(end_a <= start_b || start_a >= end_b)`.
pub fn spans_overlap(start_a: usize, end_a: usize, start_b: usize, end_b: usize) -> bool {
    !(end_a <= start_b || start_a >= end_b)
}

/// Overlap Detector: two keys of the **same** type intersecting on the char axis.
pub fn same_type_overlap(a: &SpanKey, b: &SpanKey) -> bool {
    a.entity_type == b.entity_type && spans_overlap(a.start, a.end, b.start, b.end)
}

/// Intersection over union of two keys; `0.0` when types differ or they are disjoint.
pub fn iou(a: &SpanKey, b: &SpanKey) -> f64 {
    if a.entity_type != b.entity_type {
        return 0.0;
    }
    let inter_start = a.start.max(b.start);
    let inter_end = a.end.min(b.end);
    if inter_start >= inter_end {
        return 0.0;
    }
    let union = a.end.max(b.end) - a.start.min(b.start);
    if union == 0 {
        return 0.0;
    }
    (inter_end - inter_start) as f64 / union as f64
}

/// Number of chars in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Substring by character offsets; `None` when out of range or inverted.
pub fn char_slice(s: &str, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }
    let mut indices = s.char_indices().map(|(i, _)| i).chain(std::iter::once(s.len()));
    let byte_start = indices.nth(start)?;
    let byte_end = if end == start {
        byte_start
    } else {
        indices.nth(end - start - 1)?
    };
    Some(&s[byte_start..byte_end])
}

/// Sort order used for output lists: by start, then end, then type.
pub fn by_position(a: &Span, b: &Span) -> Ordering {
    a.start
        .cmp(&b.start)
        .then(a.end.cmp(&b.end))
        .then_with(|| a.entity_type.cmp(&b.entity_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(start: i64, end: i64, ty: &str, text: &str) -> RawSpan {
        RawSpan {
            start,
            end,
            entity_type: ty.to_string(),
            text: Some(text.to_string()),
            value: None,
        }
    }

    #[test]
    fn test_char_slice_cyrillic() {
        let s = "Меня зовут Иван";
        assert_eq!(char_slice(s, 11, 15), Some("Иван"));
        assert_eq!(char_slice(s, 0, 4), Some("Меня"));
        assert_eq!(char_slice(s, 15, 15), Some(""));
        assert_eq!(char_slice(s, 11, 16), None);
    }

    #[test]
    fn test_validate_accepts_exact_text() {
        let s = "Меня зовут Иван";
        let span = Span::validate(&raw(11, 15, PERSON, "Иван"), s).unwrap();
        assert_eq!(span, Span::new(11, 15, PERSON, "Иван"));
    }

    #[test]
    fn test_validate_rejects_each_malformation() {
        let s = "Меня зовут Иван";
        assert!(matches!(
            Span::validate(&raw(-1, 4, PERSON, "Меня"), s),
            Err(SpanError::NegativeOffset { .. })
        ));
        assert!(matches!(
            Span::validate(&raw(4, 4, PERSON, ""), s),
            Err(SpanError::Empty { .. })
        ));
        assert!(matches!(
            Span::validate(&raw(11, 20, PERSON, "Иван"), s),
            Err(SpanError::OutOfBounds { end: 20, len: 15 })
        ));
        assert!(matches!(
            Span::validate(&raw(11, 15, PERSON, "Пётр"), s),
            Err(SpanError::TextMismatch { .. })
        ));
    }

    #[test]
    fn test_lenient_repairs_whitespace_only() {
        let s = "Звоните: +7 999 123-45-67";
        // stated text carries a trailing space, coordinates are right
        let repaired = Span::validate_lenient(&raw(9, 25, PHONE, "+7 999 123-45-67 "), s).unwrap();
        assert_eq!(repaired.text, "+7 999 123-45-67");
        assert!(Span::validate(&raw(9, 25, PHONE, "+7 999 123-45-67 "), s).is_err());

        // coordinates include a leading space the annotator did not write
        let repaired = Span::validate_lenient(&raw(8, 25, PHONE, "+7 999 123-45-67"), s).unwrap();
        assert_eq!(repaired.text, " +7 999 123-45-67");

        // wrong length with different content is never repaired
        assert!(Span::validate_lenient(&raw(9, 20, PHONE, "+7 999 123-45-67"), s).is_err());
    }

    #[test]
    fn test_value_alias_is_read() {
        let s = "ИНН 7707083893";
        let r = RawSpan {
            start: 4,
            end: 14,
            entity_type: INN.into(),
            text: None,
            value: Some("7707083893".into()),
        };
        assert_eq!(Span::validate(&r, s).unwrap().text, "7707083893");
        let missing = RawSpan { value: None, ..r };
        assert!(matches!(Span::validate(&missing, s), Err(SpanError::MissingText { .. })));
    }

    #[test]
    fn test_overlap_is_half_open() {
        assert!(!spans_overlap(0, 5, 5, 10));
        assert!(spans_overlap(0, 6, 5, 10));
        assert!(spans_overlap(3, 4, 0, 10));
    }

    #[test]
    fn test_same_type_overlap() {
        let a = SpanKey::new(0, 5, PERSON);
        assert!(same_type_overlap(&a, &SpanKey::new(3, 8, PERSON)));
        assert!(!same_type_overlap(&a, &SpanKey::new(3, 8, AGE)));
    }

    #[test]
    fn test_iou() {
        let t = SpanKey::new(10, 20, PERSON);
        let p = SpanKey::new(15, 25, PERSON);
        assert!((iou(&t, &p) - 5.0 / 15.0).abs() < 1e-12);
        assert_eq!(iou(&t, &SpanKey::new(15, 25, AGE)), 0.0);
        assert_eq!(iou(&t, &SpanKey::new(20, 25, PERSON)), 0.0);
        assert_eq!(iou(&t, &t), 1.0);
    }

    #[test]
    fn test_span_serializes_type_key() {
        let json = serde_json::to_value(Span::new(0, 4, PERSON, "Иван")).unwrap();
        assert_eq!(json["type"], "PERSON");
        assert!(json.get("entity_type").is_none());
    }
}
