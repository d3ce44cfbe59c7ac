//! # Greedy Overlap Resolver
//!
//! Turns a noisy multiset of candidate spans for one text into a set where no
//! two spans touch the same character, **whatever their types**. Downstream
//! consumers splice replacement text into the source ([`crate::anonymize`]),
//! and overlapping splices cannot be applied.
//!
//! ## Algorithm
//!
//! 1. Sort candidates (stable):
//!    - [`ResolutionStrategy::LongestFirst`]: by `start` ascending, then longer first.
//!    - [`ResolutionStrategy::Priority`]: by `start` ascending only, keeping insertion order on ties.
//! 2. Scan in order, comparing each candidate with every accepted span:
//!    - no overlap → accept;
//!    - overlap, longest-first → drop the candidate;
//!    - overlap, priority → the candidate replaces the accepted span only if its
//!      priority is **strictly** higher, otherwise it is dropped.
//! 3. Return the accepted spans sorted by `start`.
//!
//! The scan is O(n²) in the number of candidates. Dialog-length texts yield
//! tens of candidates, never thousands.

use tracing::debug;

use crate::priority::PriorityTable;
use crate::span::Span;

/// How conflicts between overlapping candidates are settled.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionStrategy {
    /// Earlier start wins; on equal start, the longer span wins.
    LongestFirst,
    /// Higher type priority wins; on equal priority, the earlier accepted span stays.
    Priority(PriorityTable),
}

/// The resolver. Stateless apart from its strategy; safe to share across threads.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapResolver {
    strategy: ResolutionStrategy,
}

impl OverlapResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    pub fn longest_first() -> Self {
        Self::new(ResolutionStrategy::LongestFirst)
    }

    pub fn with_priorities(table: PriorityTable) -> Self {
        Self::new(ResolutionStrategy::Priority(table))
    }

    pub fn strategy(&self) -> &ResolutionStrategy {
        &self.strategy
    }

    /// Produces a maximal non-overlapping subset of `candidates`, sorted by start.
    pub fn resolve(&self, mut candidates: Vec<Span>) -> Vec<Span> {
        if candidates.is_empty() {
            return candidates;
        }
        let total = candidates.len();

        let mut accepted = match &self.strategy {
            ResolutionStrategy::LongestFirst => {
                candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.len().cmp(&a.len())));
                resolve_longest_first(candidates)
            }
            ResolutionStrategy::Priority(table) => {
                candidates.sort_by_key(|s| s.start);
                resolve_by_priority(candidates, table)
            }
        };

        accepted.sort_by_key(|s| s.start);
        debug!(
            candidates = total,
            accepted = accepted.len(),
            "overlap resolution dropped {} spans",
            total - accepted.len()
        );
        accepted
    }
}

impl Default for OverlapResolver {
    fn default() -> Self {
        Self::longest_first()
    }
}

fn resolve_longest_first(sorted: Vec<Span>) -> Vec<Span> {
    let mut accepted: Vec<Span> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        if !accepted.iter().any(|a| a.overlaps(&candidate)) {
            accepted.push(candidate);
        }
    }
    accepted
}

fn resolve_by_priority(sorted: Vec<Span>, table: &PriorityTable) -> Vec<Span> {
    let mut accepted: Vec<Span> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        let conflicts: Vec<usize> = accepted
            .iter()
            .enumerate()
            .filter(|(_, a)| a.overlaps(&candidate))
            .map(|(i, _)| i)
            .collect();

        if conflicts.is_empty() {
            accepted.push(candidate);
            continue;
        }

        let priority = table.priority(&candidate.entity_type);
        let beats_all = conflicts
            .iter()
            .all(|&i| priority > table.priority(&accepted[i].entity_type));
        if !beats_all {
            continue;
        }

        // Sorted by start, accepted spans are disjoint: a candidate meets at most
        // one of them. The loop keeps the invariant even if that ever changes.
        let first = conflicts[0];
        for &i in conflicts.iter().skip(1).rev() {
            accepted.remove(i);
        }
        accepted[first] = candidate;
    }
    accepted
}
