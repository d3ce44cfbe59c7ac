//! # Metrics Aggregator: Precision, Recall and F1 per Entity Type
//!
//! Turns [`MatchCounts`] into the report every validation run produces: one
//! row per entity type plus two aggregate rows.
//!
//! | Row         | How it is computed                                                    |
//! |-------------|-----------------------------------------------------------------------|
//! | `<TYPE>`    | matcher restricted to that type                                       |
//! | `ALL_MICRO` | matcher over the **pooled** collections, then P/R/F1                  |
//! | `ALL_MACRO` | mean of per-type P/R/F1 over types with at least one truth span       |
//!
//! `ALL_MACRO` also reports `tp`, `fp` and `fn` summed over all types; those
//! sums are for display and never feed back into the macro averages.
//!
//! ## Degenerate divisions
//!
//! - `precision = tp / total_pred`, or `0.0` when nothing was predicted
//! - `recall = tp / total_true`, or `0.0` when there is no ground truth
//! - `f1 = 2PR / (P + R)`, or `0.0` when `P + R == 0`
//!
//! No `accuracy` column: span evaluation has no true negatives.
//!
//! ## Corpus evaluation
//!
//! Offsets are only comparable within one dialog. [`CorpusEvaluator`] matches
//! each document on its own and sums the counts; [`evaluate_corpus`] fans the
//! documents out over a rayon pool.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::matcher::{match_spans, MatchCounts, MatchPolicy};
use crate::span::{Span, SpanKey};

pub const ALL_MICRO: &str = "ALL_MICRO";
pub const ALL_MACRO: &str = "ALL_MACRO";

/// Scores for one entity type (or one aggregate row).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub total_true: usize,
    pub total_pred: usize,
    /// Share of this type among all ground-truth spans
    pub class_proportion: f64,
}

impl TypeMetrics {
    /// Metrics for `counts`, with the class proportion taken against `overall_true`.
    pub fn from_counts(counts: MatchCounts, overall_true: usize) -> Self {
        let precision = ratio(counts.tp, counts.total_pred);
        let recall = ratio(counts.tp, counts.total_true);
        Self {
            precision,
            recall,
            f1: f1(precision, recall),
            tp: counts.tp,
            fp: counts.fp(),
            fn_: counts.fn_(),
            total_true: counts.total_true,
            total_pred: counts.total_pred,
            class_proportion: ratio(counts.total_true, overall_true),
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Full evaluation result: per-type rows plus `ALL_MICRO` and `ALL_MACRO`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub per_type: BTreeMap<String, TypeMetrics>,
    pub micro: TypeMetrics,
    pub macro_avg: TypeMetrics,
}

impl MetricsReport {
    fn build(per_type_counts: &BTreeMap<String, MatchCounts>, pooled: MatchCounts) -> Self {
        let per_type: BTreeMap<String, TypeMetrics> = per_type_counts
            .iter()
            .map(|(ty, counts)| (ty.clone(), TypeMetrics::from_counts(*counts, pooled.total_true)))
            .collect();

        let micro = TypeMetrics {
            class_proportion: 1.0,
            ..TypeMetrics::from_counts(pooled, pooled.total_true)
        };

        let mut report = Self {
            per_type,
            micro,
            macro_avg: TypeMetrics::default(),
        };
        report.macro_avg = report.compute_macro();
        report
    }

    fn compute_macro(&self) -> TypeMetrics {
        let with_truth: Vec<&TypeMetrics> = self.per_type.values().filter(|m| m.total_true > 0).collect();
        let mean = |f: fn(&TypeMetrics) -> f64| {
            if with_truth.is_empty() {
                0.0
            } else {
                with_truth.iter().map(|m| f(m)).sum::<f64>() / with_truth.len() as f64
            }
        };

        TypeMetrics {
            precision: mean(|m| m.precision),
            recall: mean(|m| m.recall),
            f1: mean(|m| m.f1),
            tp: self.per_type.values().map(|m| m.tp).sum(),
            fp: self.per_type.values().map(|m| m.fp).sum(),
            fn_: self.per_type.values().map(|m| m.fn_).sum(),
            total_true: self.micro.total_true,
            total_pred: self.micro.total_pred,
            class_proportion: 1.0,
        }
    }

    /// Adds zero rows for configured types that never occurred.
    ///
    /// Such rows have no ground truth and therefore leave `ALL_MACRO` unchanged.
    pub fn with_configured_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for ty in types {
            self.per_type.entry(ty.into()).or_default();
        }
        self
    }

    /// Row by label, including `ALL_MICRO` and `ALL_MACRO`.
    pub fn get(&self, label: &str) -> Option<&TypeMetrics> {
        match label {
            ALL_MICRO => Some(&self.micro),
            ALL_MACRO => Some(&self.macro_avg),
            _ => self.per_type.get(label),
        }
    }

    /// All rows in report order: types alphabetically, then the aggregates.
    pub fn rows(&self) -> Vec<(&str, &TypeMetrics)> {
        self.per_type
            .iter()
            .map(|(ty, m)| (ty.as_str(), m))
            .chain([(ALL_MICRO, &self.micro), (ALL_MACRO, &self.macro_avg)])
            .collect()
    }
}

/// Accumulates match counts document by document.
#[derive(Debug, Clone)]
pub struct CorpusEvaluator {
    policy: MatchPolicy,
    per_type: BTreeMap<String, MatchCounts>,
    pooled: MatchCounts,
    documents: usize,
}

impl CorpusEvaluator {
    pub fn new(policy: MatchPolicy) -> Self {
        Self {
            policy,
            per_type: BTreeMap::new(),
            pooled: MatchCounts::default(),
            documents: 0,
        }
    }

    pub fn documents(&self) -> usize {
        self.documents
    }

    /// Matches one document's truth against its predictions.
    pub fn add_document(&mut self, truth: &[Span], pred: &[Span]) {
        let truth_keys: Vec<SpanKey> = truth.iter().map(Span::key).collect();
        let pred_keys: Vec<SpanKey> = pred.iter().map(Span::key).collect();

        let mut by_type: BTreeMap<&str, (Vec<&SpanKey>, Vec<&SpanKey>)> = BTreeMap::new();
        for key in &truth_keys {
            by_type.entry(key.entity_type.as_str()).or_default().0.push(key);
        }
        for key in &pred_keys {
            by_type.entry(key.entity_type.as_str()).or_default().1.push(key);
        }

        for (ty, (t, p)) in by_type {
            let counts = match_spans(t, p, self.policy);
            *self.per_type.entry(ty.to_string()).or_default() += counts;
        }

        // pooled before matching, never summed from the per-type rows
        self.pooled += match_spans(&truth_keys, &pred_keys, self.policy);
        self.documents += 1;
    }

    /// Folds another evaluator's counts into this one.
    pub fn merged(mut self, other: CorpusEvaluator) -> Self {
        for (ty, counts) in other.per_type {
            *self.per_type.entry(ty).or_default() += counts;
        }
        self.pooled += other.pooled;
        self.documents += other.documents;
        self
    }

    pub fn finish(&self) -> MetricsReport {
        MetricsReport::build(&self.per_type, self.pooled)
    }
}

/// Evaluates a single text.
pub fn evaluate(truth: &[Span], pred: &[Span], policy: MatchPolicy) -> MetricsReport {
    let mut evaluator = CorpusEvaluator::new(policy);
    evaluator.add_document(truth, pred);
    evaluator.finish()
}

/// Evaluates many `(truth, prediction)` documents in parallel.
pub fn evaluate_corpus<T, P>(documents: &[(T, P)], policy: MatchPolicy) -> MetricsReport
where
    T: AsRef<[Span]> + Sync,
    P: AsRef<[Span]> + Sync,
{
    documents
        .par_iter()
        .fold(
            || CorpusEvaluator::new(policy),
            |mut acc, (truth, pred)| {
                acc.add_document(truth.as_ref(), pred.as_ref());
                acc
            },
        )
        .reduce(|| CorpusEvaluator::new(policy), CorpusEvaluator::merged)
        .finish()
}
