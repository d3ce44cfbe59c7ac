//! # Prediction Refinement
//!
//! Two repairs for systematic recognizer habits, applied before evaluation
//! when `refine_predictions` is enabled:
//!
//! - **Split names**: taggers often emit `Иван` and `Петров` as two PERSON
//!   spans. Consecutive PERSON spans separated by at most
//!   [`PERSON_MERGE_GAP`] chars become one span.
//! - **Padded ages**: an AGE span like `мне 25 лет уже` is narrowed to the
//!   `25 лет` it contains.
//!
//! Both read the replacement text back from the source, so refined spans are
//! still exact substrings.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::span::{char_len, char_slice, Span, AGE, PERSON};

/// Largest gap, in chars, bridged between two PERSON spans.
pub const PERSON_MERGE_GAP: usize = 3;

static AGE_CORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s*лет").expect("AGE pattern is valid"));

/// Fuses runs of neighbouring PERSON spans. Output is sorted by start.
pub fn merge_adjacent_persons(mut spans: Vec<Span>, source: &str) -> Vec<Span> {
    spans.sort_by_key(|s| s.start);

    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    let mut iter = spans.into_iter().peekable();
    while let Some(first) = iter.next() {
        if first.entity_type != PERSON {
            out.push(first);
            continue;
        }

        let mut run = vec![first];
        let mut end = run[0].end;
        while let Some(next) = iter.next_if(|n| n.entity_type == PERSON && n.start <= end + PERSON_MERGE_GAP) {
            end = end.max(next.end);
            run.push(next);
        }

        if run.len() == 1 {
            out.extend(run);
            continue;
        }
        let start = run[0].start;
        match Span::from_source(source, start, end, PERSON) {
            Ok(merged) => {
                debug!(start, end, parts = run.len(), "merged adjacent PERSON spans");
                out.push(merged);
            }
            // coordinates do not fit this source; leave the parts alone
            Err(_) => out.extend(run),
        }
    }
    out
}

/// Narrows AGE spans to their `<number> лет` core when one is present.
pub fn tighten_age(spans: Vec<Span>, source: &str) -> Vec<Span> {
    spans
        .into_iter()
        .map(|span| {
            if span.entity_type != AGE {
                return span;
            }
            let Some(m) = AGE_CORE.find(&span.text) else {
                return span;
            };
            let start = span.start + char_len(&span.text[..m.start()]);
            let end = start + char_len(m.as_str());
            match char_slice(source, start, end) {
                Some(text) if text == m.as_str() => Span::new(start, end, AGE, text),
                _ => span,
            }
        })
        .collect()
}

/// Applies [`merge_adjacent_persons`] then [`tighten_age`].
pub fn refine(spans: Vec<Span>, source: &str) -> Vec<Span> {
    tighten_age(merge_adjacent_persons(spans, source), source)
}
