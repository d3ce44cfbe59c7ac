//! # Placeholder Anonymization
//!
//! Replaces resolved spans with `<TYPE>` placeholders:
//!
//! ```text
//! "Меня зовут Иван, мой телефон 89991234567"
//!   → "Меня зовут <PERSON>, мой телефон <PHONE>"
//! ```
//!
//! Replacements are spliced from the last span to the first, so earlier
//! offsets stay valid while the text changes length. This only works on
//! non-overlapping spans, which is exactly what [`crate::resolver`] produces;
//! overlapping input is rejected with [`Error::OverlappingSpans`].
//!
//! ## Aggressiveness
//!
//! | Types                                        | Replaced when         |
//! |----------------------------------------------|-----------------------|
//! | PERSON, PHONE, EMAIL, PASSPORT, SNILS, INN   | `aggressiveness > 0.3`|
//! | everything else                              | `aggressiveness > 0.1`|

use crate::error::{Error, Result};
use crate::span::{char_len, Span, SpanError, EMAIL, INN, PASSPORT, PERSON, PHONE, SNILS};

const CONSERVATIVE_TYPES: [&str; 6] = [PERSON, PHONE, EMAIL, PASSPORT, SNILS, INN];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anonymizer {
    aggressiveness: f64,
}

impl Anonymizer {
    /// `aggressiveness` is clamped to `[0, 1]`; NaN counts as `0`.
    pub fn new(aggressiveness: f64) -> Self {
        let aggressiveness = if aggressiveness.is_nan() {
            0.0
        } else {
            aggressiveness.clamp(0.0, 1.0)
        };
        Self { aggressiveness }
    }

    pub fn aggressiveness(&self) -> f64 {
        self.aggressiveness
    }

    pub fn should_anonymize(&self, entity_type: &str) -> bool {
        if CONSERVATIVE_TYPES.contains(&entity_type) {
            self.aggressiveness > 0.3
        } else {
            self.aggressiveness > 0.1
        }
    }

    /// Splices placeholders for `spans` into `text`.
    pub fn anonymize(&self, text: &str, spans: &[Span]) -> Result<String> {
        let mut ordered: Vec<&Span> = spans.iter().collect();
        ordered.sort_by_key(|s| (s.start, s.end));

        let len = char_len(text);
        for pair in ordered.windows(2) {
            if pair[0].overlaps(pair[1]) {
                return Err(Error::OverlappingSpans {
                    first_start: pair[0].start,
                    first_end: pair[0].end,
                    second_start: pair[1].start,
                    second_end: pair[1].end,
                });
            }
        }
        for span in &ordered {
            if span.end <= span.start {
                return Err(SpanError::Empty { start: span.start, end: span.end }.into());
            }
            if span.end > len {
                return Err(SpanError::OutOfBounds { end: span.end, len }.into());
            }
        }

        // char offset -> byte offset, with one entry past the end
        let byte_at: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        let mut out = text.to_string();
        for span in ordered.into_iter().rev() {
            if !self.should_anonymize(&span.entity_type) {
                continue;
            }
            out.replace_range(byte_at[span.start]..byte_at[span.end], &format!("<{}>", span.entity_type));
        }
        Ok(out)
    }
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self::new(0.8)
    }
}
