//! # pii-core: Reconciling and Scoring Personal-Data Spans in Russian Text
//!
//! Several recognizers (regex libraries, statistical taggers, transformer
//! models) look for personal data in the same dialogs and disagree, often
//! claiming the same characters with different boundaries or types. This crate turns their raw output into
//! one clean annotation and measures it against ground truth.
//!
//! ## Data Flow
//!
//! 1.  **Input**: dialogs with validated ground truth ([`dataset`]) and one
//!     output per recognizer ([`recognizer`]).
//! 2.  **Consensus** ([`consensus`]): weighted voting per `(start, end, type)`,
//!     or a plain union.
//! 3.  **Overlap resolution** ([`resolver`]): a greedy pass that leaves no two
//!     spans on the same character, longest-first or by type [`priority`].
//! 4.  **Refinement** ([`refine`], optional): fused names, tightened ages.
//! 5.  **Matching** ([`matcher`]): one-to-one alignment with ground truth,
//!     strict (±1 char) or relaxed (IoU).
//! 6.  **Metrics** ([`metrics`]): per-type P/R/F1 plus `ALL_MICRO` and `ALL_MACRO`,
//!     exported as CSV by [`report`].
//!
//! Resolved spans can also be spliced out of the text by [`anonymize`].
//!
//! ## Example
//!
//! ```rust
//! use pii_core::{evaluate, MatchPolicy, OverlapResolver, Span};
//!
//! let text = "Меня зовут Иван Петров";
//! let candidates = vec![
//!     Span::from_source(text, 11, 15, "PERSON").unwrap(),
//!     Span::from_source(text, 11, 22, "PERSON").unwrap(),
//! ];
//!
//! // 1. Keep one span per region
//! let resolved = OverlapResolver::longest_first().resolve(candidates);
//! assert_eq!(resolved[0].text, "Иван Петров");
//!
//! // 2. Score it
//! let truth = vec![Span::from_source(text, 11, 22, "PERSON").unwrap()];
//! let report = evaluate(&truth, &resolved, MatchPolicy::Strict);
//! assert_eq!(report.micro.f1, 1.0);
//! ```
//!
//! ## Offsets
//!
//! All offsets are **character** offsets into the dialog text, never bytes.

pub mod anonymize;
pub mod config;
pub mod consensus;
pub mod dataset;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod priority;
pub mod recognizer;
pub mod refine;
pub mod report;
pub mod resolver;
pub mod span;

pub use anonymize::Anonymizer;
pub use config::EvalConfig;
pub use consensus::{ConsensusMerger, MergeMode, MergeOutcome, WeightedSource};
pub use dataset::{Dataset, DatasetStats, Dialog, Predictions};
pub use error::{Error, Result};
pub use matcher::{match_spans, MatchCounts, MatchPolicy};
pub use metrics::{evaluate, evaluate_corpus, CorpusEvaluator, MetricsReport, TypeMetrics};
pub use priority::PriorityTable;
pub use recognizer::{PrecomputedRecognizer, Recognizer, RecognizerError, RecognizerOutput};
pub use resolver::{OverlapResolver, ResolutionStrategy};
pub use span::{RawSpan, Span, SpanError, SpanKey};
