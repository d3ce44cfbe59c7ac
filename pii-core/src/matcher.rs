//! # Span Matcher: One-to-One Alignment of Truth and Prediction
//!
//! Counts how many predicted spans correspond to ground-truth spans of one text.
//! Only `(start, end, type)` matters; the `text` field is never compared.
//!
//! ## Algorithm
//!
//! 1. Deduplicate both sides into ordered sets of [`SpanKey`]: repeated
//!    detections at identical coordinates count once.
//! 2. Exact matches are taken first and removed from both sides.
//! 3. The leftovers are paired according to the [`MatchPolicy`]:
//!    - **Strict** (`overlap_threshold == 1.0`): a near match, same type and
//!      `|Δstart| + |Δend| <= 1`, tolerating one char of tokenizer noise.
//!      The first candidate in order wins.
//!    - **Relaxed** (`0 < overlap_threshold < 1`): the same-type candidate with the
//!      highest IoU that reaches the threshold.
//!
//! Step 3 is greedy: truth spans are visited in ascending `(start, end, type)`
//! order and a prediction claimed by an earlier truth span is never
//! reassigned. On adversarial layouts this can count fewer matches than an
//! optimal bipartite assignment would; evaluation numbers depend on this exact
//! behavior.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::span::{iou, SpanKey};

/// How leftover spans are paired after exact matching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Exact coordinates, or off by one char in total.
    Strict,
    /// Best same-type IoU at or above `min_iou`.
    Relaxed { min_iou: f64 },
}

impl MatchPolicy {
    /// `1.0` selects [`MatchPolicy::Strict`], anything in `(0, 1)` selects relaxed IoU.
    pub fn from_threshold(overlap_threshold: f64) -> Result<Self> {
        if overlap_threshold == 1.0 {
            Ok(MatchPolicy::Strict)
        } else if overlap_threshold > 0.0 && overlap_threshold < 1.0 {
            Ok(MatchPolicy::Relaxed {
                min_iou: overlap_threshold,
            })
        } else {
            Err(Error::invalid_config(format!(
                "overlap threshold must be in (0, 1], got {overlap_threshold}"
            )))
        }
    }

    pub fn threshold(&self) -> f64 {
        match self {
            MatchPolicy::Strict => 1.0,
            MatchPolicy::Relaxed { min_iou } => *min_iou,
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        MatchPolicy::Strict
    }
}

/// Match counts for one evaluation unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCounts {
    /// Matched pairs
    pub tp: usize,
    /// Distinct ground-truth keys
    pub total_true: usize,
    /// Distinct predicted keys
    pub total_pred: usize,
}

impl MatchCounts {
    pub fn fp(&self) -> usize {
        self.total_pred - self.tp
    }

    pub fn fn_(&self) -> usize {
        self.total_true - self.tp
    }
}

impl std::ops::AddAssign for MatchCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.tp += rhs.tp;
        self.total_true += rhs.total_true;
        self.total_pred += rhs.total_pred;
    }
}

impl std::ops::Add for MatchCounts {
    type Output = MatchCounts;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

/// Near match: same type and boundaries off by at most one char in total.
pub fn is_near_match(a: &SpanKey, b: &SpanKey) -> bool {
    a.entity_type == b.entity_type && a.start.abs_diff(b.start) + a.end.abs_diff(b.end) <= 1
}

/// Aligns ground truth and predictions of one text.
pub fn match_spans<'a, T, P>(truth: T, pred: P, policy: MatchPolicy) -> MatchCounts
where
    T: IntoIterator<Item = &'a SpanKey>,
    P: IntoIterator<Item = &'a SpanKey>,
{
    let truth: BTreeSet<&SpanKey> = truth.into_iter().collect();
    let pred: BTreeSet<&SpanKey> = pred.into_iter().collect();
    let (total_true, total_pred) = (truth.len(), pred.len());

    let exact = truth.intersection(&pred).count();
    let remaining_true: Vec<&SpanKey> = truth.difference(&pred).copied().collect();
    let mut remaining_pred: Vec<Option<&SpanKey>> = pred.difference(&truth).map(|k| Some(*k)).collect();

    let mut tp = exact;
    for t in remaining_true {
        let claimed = match policy {
            MatchPolicy::Strict => remaining_pred
                .iter()
                .position(|p| p.map_or(false, |p| is_near_match(t, p))),
            MatchPolicy::Relaxed { min_iou } => best_iou(t, &remaining_pred, min_iou),
        };
        if let Some(i) = claimed {
            remaining_pred[i] = None;
            tp += 1;
        }
    }

    MatchCounts {
        tp,
        total_true,
        total_pred,
    }
}

fn best_iou(t: &SpanKey, candidates: &[Option<&SpanKey>], min_iou: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, p) in candidates.iter().enumerate() {
        let Some(p) = p else { continue };
        let score = iou(t, p);
        if score >= min_iou && best.map_or(score > 0.0, |(_, b)| score > b) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{AGE, PERSON};

    fn key(start: usize, end: usize, ty: &str) -> SpanKey {
        SpanKey::new(start, end, ty)
    }

    fn run(truth: &[SpanKey], pred: &[SpanKey], threshold: f64) -> MatchCounts {
        match_spans(truth, pred, MatchPolicy::from_threshold(threshold).unwrap())
    }

    #[test]
    fn test_policy_from_threshold() {
        assert_eq!(MatchPolicy::from_threshold(1.0).unwrap(), MatchPolicy::Strict);
        assert_eq!(
            MatchPolicy::from_threshold(0.5).unwrap(),
            MatchPolicy::Relaxed { min_iou: 0.5 }
        );
        assert!(MatchPolicy::from_threshold(0.0).is_err());
        assert!(MatchPolicy::from_threshold(1.5).is_err());
        assert!(MatchPolicy::from_threshold(f64::NAN).is_err());
    }

    #[test]
    fn test_exact_match() {
        let c = run(&[key(10, 20, PERSON)], &[key(10, 20, PERSON)], 1.0);
        assert_eq!(c, MatchCounts { tp: 1, total_true: 1, total_pred: 1 });
    }

    #[test]
    fn test_near_match_in_strict_mode() {
        assert_eq!(run(&[key(10, 20, PERSON)], &[key(11, 20, PERSON)], 1.0).tp, 1);
        assert_eq!(run(&[key(10, 20, PERSON)], &[key(10, 21, PERSON)], 1.0).tp, 1);
        assert_eq!(run(&[key(10, 20, PERSON)], &[key(11, 21, PERSON)], 1.0).tp, 0);
        assert_eq!(run(&[key(10, 20, PERSON)], &[key(12, 22, PERSON)], 1.0).tp, 0);
    }

    #[test]
    fn test_near_match_requires_same_type() {
        assert_eq!(run(&[key(10, 20, PERSON)], &[key(11, 20, AGE)], 1.0).tp, 0);
    }

    #[test]
    fn test_relaxed_iou() {
        let truth = [key(10, 20, PERSON)];
        let pred = [key(15, 25, PERSON)];
        assert_eq!(run(&truth, &pred, 0.3).tp, 1);
        assert_eq!(run(&truth, &pred, 0.5).tp, 0);
    }

    #[test]
    fn test_relaxed_does_not_use_near_match() {
        // Δ = 1 but IoU = 9/10 < 0.95
        assert_eq!(run(&[key(10, 20, PERSON)], &[key(11, 20, PERSON)], 0.95).tp, 0);
    }

    #[test]
    fn test_relaxed_picks_highest_iou() {
        let truth = [key(0, 10, PERSON), key(20, 30, PERSON)];
        // (2, 10) has IoU 0.8 with the first truth span, (0, 15) has 10/15
        let pred = [key(0, 15, PERSON), key(2, 10, PERSON)];
        let c = run(&truth, &pred, 0.5);
        assert_eq!(c.tp, 1);

        // (0, 16) overlaps (0, 15) at 15/16 but (2, 10) only at 0.5, so it
        // matches only if (0, 10) took (2, 10)
        let truth = [key(0, 10, PERSON), key(0, 16, PERSON)];
        let c = run(&truth, &pred, 0.6);
        assert_eq!((c.tp, c.fp(), c.fn_()), (2, 0, 0));
    }

    #[test]
    fn test_deduplication() {
        let c = run(&[key(10, 20, PERSON)], &[key(10, 20, PERSON), key(10, 20, PERSON)], 1.0);
        assert_eq!(c, MatchCounts { tp: 1, total_true: 1, total_pred: 1 });
        assert_eq!(c.fp(), 0);
    }

    #[test]
    fn test_greedy_order_can_undercount() {
        // truth (10,20) is visited first and takes (10,19); truth (11,19) is then
        // three chars away from (10,21). The pairing (10,20)->(10,21),
        // (11,19)->(10,19) would have matched both.
        let truth = [key(10, 20, PERSON), key(11, 19, PERSON)];
        let pred = [key(10, 19, PERSON), key(10, 21, PERSON)];
        let c = run(&truth, &pred, 1.0);
        assert_eq!(c.tp, 1);
        assert_eq!(c.total_true, 2);
        assert_eq!(c.fp(), 1);
    }

    #[test]
    fn test_prediction_is_claimed_once() {
        let truth = [key(10, 20, PERSON), key(11, 20, PERSON)];
        let pred = [key(10, 19, PERSON)];
        let c = run(&truth, &pred, 1.0);
        assert_eq!(c.tp, 1);
        assert_eq!(c.fn_(), 1);
    }

    #[test]
    fn test_empty_sides() {
        assert_eq!(run(&[], &[], 1.0), MatchCounts::default());
        assert_eq!(run(&[key(0, 3, AGE)], &[], 1.0), MatchCounts { tp: 0, total_true: 1, total_pred: 0 });
        assert_eq!(run(&[], &[key(0, 3, AGE)], 0.5), MatchCounts { tp: 0, total_true: 0, total_pred: 1 });
    }

    #[test]
    fn test_counts_add() {
        let a = MatchCounts { tp: 1, total_true: 2, total_pred: 3 };
        let b = MatchCounts { tp: 2, total_true: 2, total_pred: 2 };
        assert_eq!(a + b, MatchCounts { tp: 3, total_true: 4, total_pred: 5 });
    }
}
