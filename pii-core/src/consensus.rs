//! # Weighted Consensus Merger
//!
//! Several recognizers run over the same text and disagree. The merger turns
//! their outputs into one conflict-free annotation.
//!
//! ## Modes
//!
//! | Mode                      | What reaches the resolver                               |
//! |---------------------------|---------------------------------------------------------|
//! | [`MergeMode::Consensus`]  | spans whose weighted vote share passes the threshold    |
//! | [`MergeMode::Union`]      | every candidate from every source                       |
//!
//! The mode is always chosen explicitly by configuration.
//!
//! ## Voting
//!
//! 1. Each span votes for its key `(start, end, type)` with the weight of its source.
//!    A source votes at most once per key.
//! 2. `consensus_score = Σ voter weights / Σ all configured weights`. Sources that
//!    failed or stayed silent count as zero votes, which penalizes spans found
//!    only by a light minority.
//! 3. Keys with `consensus_score >= threshold` survive; their text comes from the
//!    heaviest voter (first one wins on equal weight).
//! 4. Survivors go through the [`OverlapResolver`]: different keys can still overlap.
//!
//! ## Failures
//!
//! A recognizer error is logged and recorded in [`MergeOutcome::failed_sources`];
//! the merge continues with the other sources. Only when no configured source
//! produced output does the merge fail with [`Error::NoRecognizerAvailable`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::recognizer::{Recognizer, RecognizerError, RecognizerOutput};
use crate::resolver::OverlapResolver;
use crate::span::{Span, SpanKey};

/// One recognizer and its trust level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedSource {
    pub name: String,
    pub weight: f64,
}

impl WeightedSource {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// How per-source outputs are combined before overlap resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MergeMode {
    /// Weighted voting with a minimum share of the total configured weight.
    Consensus { threshold: f64 },
    /// Union of all candidates, no voting.
    Union,
}

/// A single source's vote for a key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vote {
    pub source: String,
    pub weight: f64,
    pub text: String,
}

/// All votes cast for one `(start, end, type)` key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteRecord {
    pub key: SpanKey,
    pub votes: Vec<Vote>,
}

impl VoteRecord {
    /// Sum of the weights of the sources that voted for this key.
    pub fn vote_weight(&self) -> f64 {
        self.votes.iter().map(|v| v.weight).sum()
    }

    /// Text from the heaviest voter; the earliest vote wins on equal weight.
    pub fn best_text(&self) -> &str {
        let mut best: Option<&Vote> = None;
        for vote in &self.votes {
            if best.map_or(true, |b| vote.weight > b.weight) {
                best = Some(vote);
            }
        }
        best.map(|v| v.text.as_str()).unwrap_or_default()
    }

    fn into_span(self) -> Span {
        let text = self.best_text().to_string();
        Span::new(self.key.start, self.key.end, self.key.entity_type, text)
    }
}

/// Result of merging one text.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Resolved, non-overlapping spans sorted by start.
    pub spans: Vec<Span>,
    /// Spans handed to the resolver (threshold survivors, or the whole union).
    pub candidates: usize,
    /// Sources that produced no output, with the reason.
    pub failed_sources: Vec<(String, RecognizerError)>,
}

/// Combines votes from several recognizers into one annotation.
#[derive(Debug, Clone)]
pub struct ConsensusMerger {
    sources: Vec<WeightedSource>,
    total_weight: f64,
    mode: MergeMode,
    resolver: OverlapResolver,
}

impl ConsensusMerger {
    /// Validates the configuration: unique names, finite positive weights,
    /// consensus threshold in `(0, 1]`.
    pub fn new(sources: Vec<WeightedSource>, mode: MergeMode, resolver: OverlapResolver) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::invalid_config("at least one weighted source is required"));
        }
        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.name.as_str()) {
                return Err(Error::invalid_config(format!("duplicate source '{}'", source.name)));
            }
            if !source.weight.is_finite() || source.weight <= 0.0 {
                return Err(Error::invalid_config(format!(
                    "weight of '{}' must be > 0, got {}",
                    source.name, source.weight
                )));
            }
        }
        if let MergeMode::Consensus { threshold } = mode {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(Error::invalid_config(format!(
                    "consensus threshold must be in (0, 1], got {threshold}"
                )));
            }
        }

        let total_weight = sources.iter().map(|s| s.weight).sum();
        Ok(Self {
            sources,
            total_weight,
            mode,
            resolver,
        })
    }

    pub fn sources(&self) -> &[WeightedSource] {
        &self.sources
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn weight(&self, source: &str) -> Option<f64> {
        self.sources.iter().find(|s| s.name == source).map(|s| s.weight)
    }

    /// Runs every recognizer on `text` and merges their outputs.
    pub fn merge_with(&self, recognizers: &[&dyn Recognizer], text: &str) -> Result<MergeOutcome> {
        let outputs: Vec<(String, RecognizerOutput)> = recognizers
            .iter()
            .map(|r| (r.name().to_string(), r.extract(text)))
            .collect();
        self.merge(&outputs)
    }

    /// Merges already collected outputs, one entry per source.
    ///
    /// Configured sources missing from `outputs` are recorded as failed with
    /// [`RecognizerError::MissingOutput`]. A source listed twice is a
    /// configuration error.
    pub fn merge(&self, outputs: &[(String, RecognizerOutput)]) -> Result<MergeOutcome> {
        let mut seen = HashSet::new();
        for (name, _) in outputs {
            if self.weight(name).is_none() {
                return Err(Error::UnknownSource(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::invalid_config(format!("source '{name}' has more than one output")));
            }
        }

        let mut failed_sources = Vec::new();
        for (name, output) in outputs {
            if let Err(err) = output {
                warn!(source = %name, "recognizer failed, counting zero votes: {err}");
                failed_sources.push((name.clone(), err.clone()));
            }
        }
        for source in &self.sources {
            if !outputs.iter().any(|(name, _)| *name == source.name) {
                warn!(source = %source.name, "recognizer produced no output, counting zero votes");
                failed_sources.push((source.name.clone(), RecognizerError::MissingOutput));
            }
        }
        if failed_sources.len() >= self.sources.len() {
            return Err(Error::NoRecognizerAvailable {
                failed: failed_sources.len(),
            });
        }

        let candidates: Vec<Span> = match self.mode {
            MergeMode::Consensus { threshold } => self
                .tally(outputs)
                .into_iter()
                .filter(|record| self.consensus_score(record) >= threshold)
                .map(VoteRecord::into_span)
                .collect(),
            MergeMode::Union => outputs
                .iter()
                .filter_map(|(_, output)| output.as_ref().ok())
                .flatten()
                .cloned()
                .collect(),
        };

        let count = candidates.len();
        let spans = self.resolver.resolve(candidates);
        debug!(
            mode = ?self.mode,
            candidates = count,
            kept = spans.len(),
            failed = failed_sources.len(),
            "merged recognizer outputs"
        );

        Ok(MergeOutcome {
            spans,
            candidates: count,
            failed_sources,
        })
    }

    /// Groups successful outputs into vote records ordered by key.
    ///
    /// Failed outputs and sources without a configured weight cast no votes.
    pub fn tally(&self, outputs: &[(String, RecognizerOutput)]) -> Vec<VoteRecord> {
        let mut votes: BTreeMap<SpanKey, Vec<Vote>> = BTreeMap::new();
        for (name, output) in outputs {
            let (Some(weight), Ok(spans)) = (self.weight(name), output) else {
                continue;
            };
            for span in spans {
                let entry = votes.entry(span.key()).or_default();
                if entry.iter().any(|v| v.source == *name) {
                    continue;
                }
                entry.push(Vote {
                    source: name.clone(),
                    weight,
                    text: span.text.clone(),
                });
            }
        }
        votes
            .into_iter()
            .map(|(key, votes)| VoteRecord { key, votes })
            .collect()
    }

    /// Share of the total configured weight that voted for this record.
    pub fn consensus_score(&self, record: &VoteRecord) -> f64 {
        record.vote_weight() / self.total_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::PrecomputedRecognizer;
    use crate::span::{AGE, PERSON, PHONE};

    fn reference_sources() -> Vec<WeightedSource> {
        vec![
            WeightedSource::new("natasha", 1.0),
            WeightedSource::new("spacy", 1.1),
            WeightedSource::new("bert", 1.3),
            WeightedSource::new("regexp", 0.7),
        ]
    }

    fn merger(mode: MergeMode) -> ConsensusMerger {
        ConsensusMerger::new(reference_sources(), mode, OverlapResolver::longest_first()).unwrap()
    }

    fn span(start: usize, end: usize, ty: &str) -> Span {
        Span::new(start, end, ty, "x".repeat(end - start))
    }

    #[test]
    fn test_rejects_invalid_config() {
        let r = OverlapResolver::longest_first();
        assert!(ConsensusMerger::new(vec![], MergeMode::Union, r.clone()).is_err());
        assert!(ConsensusMerger::new(
            vec![WeightedSource::new("a", 0.0)],
            MergeMode::Union,
            r.clone()
        )
        .is_err());
        assert!(ConsensusMerger::new(
            vec![WeightedSource::new("a", 1.0), WeightedSource::new("a", 2.0)],
            MergeMode::Union,
            r.clone()
        )
        .is_err());
        assert!(ConsensusMerger::new(
            reference_sources(),
            MergeMode::Consensus { threshold: 0.0 },
            r.clone()
        )
        .is_err());
        assert!(ConsensusMerger::new(reference_sources(), MergeMode::Consensus { threshold: 1.0 }, r).is_ok());
    }

    #[test]
    fn test_consensus_score_uses_all_configured_weight() {
        // total configured weight = 4.1
        let m = merger(MergeMode::Consensus { threshold: 0.4 });
        let outputs = vec![
            ("bert".to_string(), Ok(vec![span(0, 4, PERSON)])),
            ("spacy".to_string(), Ok(vec![span(0, 4, PERSON)])),
            ("regexp".to_string(), Ok(vec![span(10, 21, PHONE)])),
            ("natasha".to_string(), Ok(vec![])),
        ];
        let records = m.tally(&outputs);
        assert_eq!(records.len(), 2);
        let person = &records[0];
        assert!((m.consensus_score(person) - 2.4 / 4.1).abs() < 1e-12);

        let outcome = m.merge(&outputs).unwrap();
        // PERSON: 2.4/4.1 ≈ 0.585 kept; PHONE: 0.7/4.1 ≈ 0.171 dropped
        assert_eq!(outcome.spans, vec![span(0, 4, PERSON)]);
        assert_eq!(outcome.candidates, 1);
        assert!(outcome.failed_sources.is_empty());
    }

    #[test]
    fn test_text_comes_from_heaviest_voter() {
        let m = merger(MergeMode::Consensus { threshold: 0.1 });
        let outputs = vec![
            ("natasha".to_string(), Ok(vec![Span::new(0, 4, PERSON, "from natasha")])),
            ("bert".to_string(), Ok(vec![Span::new(0, 4, PERSON, "from bert")])),
            ("spacy".to_string(), Ok(vec![Span::new(0, 4, PERSON, "from spacy")])),
        ];
        let outcome = m.merge(&outputs).unwrap();
        assert_eq!(outcome.spans[0].text, "from bert");
    }

    #[test]
    fn test_duplicate_spans_from_one_source_vote_once() {
        let m = merger(MergeMode::Consensus { threshold: 0.3 });
        let outputs = vec![("regexp".to_string(), Ok(vec![span(0, 3, AGE), span(0, 3, AGE), span(0, 3, AGE)]))];
        let records = m.tally(&outputs);
        assert_eq!(records[0].votes.len(), 1);
        // 0.7 / 4.1 < 0.3 even though the span was emitted three times
        assert!(m.merge(&outputs).unwrap().spans.is_empty());
    }

    #[test]
    fn test_failed_source_is_tolerated() {
        let m = merger(MergeMode::Consensus { threshold: 0.4 });
        let outputs = vec![
            ("bert".to_string(), Err(RecognizerError::Timeout(5000))),
            ("spacy".to_string(), Ok(vec![span(0, 4, PERSON)])),
            ("natasha".to_string(), Ok(vec![span(0, 4, PERSON)])),
            ("regexp".to_string(), Ok(vec![])),
        ];
        let outcome = m.merge(&outputs).unwrap();
        // 2.1 / 4.1 ≈ 0.512: the failed source is a zero vote, not fatal
        assert_eq!(outcome.spans, vec![span(0, 4, PERSON)]);
        assert_eq!(outcome.failed_sources, vec![("bert".to_string(), RecognizerError::Timeout(5000))]);
    }

    #[test]
    fn test_absent_sources_are_recorded_as_missing() {
        let m = merger(MergeMode::Union);
        let outcome = m.merge(&[("regexp".to_string(), Ok(vec![span(0, 3, AGE)]))]).unwrap();
        assert_eq!(outcome.spans.len(), 1);
        assert_eq!(outcome.failed_sources.len(), 3);
        assert!(outcome
            .failed_sources
            .iter()
            .all(|(_, e)| *e == RecognizerError::MissingOutput));
    }

    #[test]
    fn test_all_sources_failing_is_an_error() {
        let m = merger(MergeMode::Union);
        let outputs: Vec<(String, RecognizerOutput)> = reference_sources()
            .into_iter()
            .map(|s| (s.name, Err(RecognizerError::Unavailable("not installed".into()))))
            .collect();
        assert!(matches!(
            m.merge(&outputs),
            Err(Error::NoRecognizerAvailable { failed: 4 })
        ));
    }

    #[test]
    fn test_all_sources_empty_is_not_an_error() {
        let m = merger(MergeMode::Consensus { threshold: 0.4 });
        let outputs: Vec<(String, RecognizerOutput)> = reference_sources()
            .into_iter()
            .map(|s| (s.name, Ok(vec![])))
            .collect();
        let outcome = m.merge(&outputs).unwrap();
        assert!(outcome.spans.is_empty());
        assert!(outcome.failed_sources.is_empty());
    }

    #[test]
    fn test_source_listed_twice_is_rejected() {
        let m = ConsensusMerger::new(
            vec![WeightedSource::new("a", 1.0), WeightedSource::new("b", 1.0)],
            MergeMode::Consensus { threshold: 0.4 },
            OverlapResolver::longest_first(),
        )
        .unwrap();
        let outputs = vec![
            ("a".to_string(), Err(RecognizerError::Failed("boom".into()))),
            ("a".to_string(), Err(RecognizerError::Failed("boom".into()))),
            ("b".to_string(), Ok(vec![span(0, 4, PERSON)])),
        ];
        // two entries for one source never count as two failed sources
        assert!(matches!(m.merge(&outputs), Err(Error::InvalidConfig(_))));

        let outputs = vec![
            ("a".to_string(), Err(RecognizerError::Failed("boom".into()))),
            ("b".to_string(), Ok(vec![span(0, 4, PERSON)])),
        ];
        let outcome = m.merge(&outputs).unwrap();
        assert_eq!(outcome.spans, vec![span(0, 4, PERSON)]);
        assert_eq!(outcome.failed_sources.len(), 1);
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let m = merger(MergeMode::Union);
        let outputs = vec![("deeppavlov".to_string(), Ok(vec![]))];
        assert!(matches!(m.merge(&outputs), Err(Error::UnknownSource(name)) if name == "deeppavlov"));
    }

    #[test]
    fn test_union_resolves_overlaps() {
        let m = merger(MergeMode::Union);
        let outputs = vec![
            ("natasha".to_string(), Ok(vec![span(0, 12, PERSON)])),
            ("regexp".to_string(), Ok(vec![span(5, 9, AGE), span(20, 31, PHONE)])),
        ];
        let outcome = m.merge(&outputs).unwrap();
        assert_eq!(outcome.candidates, 3);
        assert_eq!(outcome.spans, vec![span(0, 12, PERSON), span(20, 31, PHONE)]);
    }

    #[test]
    fn test_consensus_survivors_are_resolved() {
        let m = merger(MergeMode::Consensus { threshold: 0.2 });
        let outputs = vec![
            ("bert".to_string(), Ok(vec![span(0, 10, PERSON)])),
            ("spacy".to_string(), Ok(vec![span(0, 6, PERSON)])),
        ];
        let outcome = m.merge(&outputs).unwrap();
        assert_eq!(outcome.candidates, 2);
        assert_eq!(outcome.spans, vec![span(0, 10, PERSON)]);
    }

    #[test]
    fn test_merge_with_recognizers() {
        let text = "Иван, 89991234567";
        let bert = PrecomputedRecognizer::new("bert").with(text, Ok(vec![Span::new(0, 4, PERSON, "Иван")]));
        let spacy = PrecomputedRecognizer::new("spacy").with(text, Ok(vec![Span::new(0, 4, PERSON, "Иван")]));
        let regexp = PrecomputedRecognizer::new("regexp")
            .with(text, Ok(vec![Span::new(6, 17, PHONE, "89991234567")]));
        let natasha = PrecomputedRecognizer::new("natasha");

        let m = merger(MergeMode::Consensus { threshold: 0.4 });
        let outcome = m.merge_with(&[&bert, &spacy, &regexp, &natasha], text).unwrap();
        assert_eq!(outcome.spans, vec![Span::new(0, 4, PERSON, "Иван")]);
        assert_eq!(outcome.failed_sources, vec![("natasha".to_string(), RecognizerError::MissingOutput)]);
    }
}
