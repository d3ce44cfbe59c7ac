//! # Evaluation Configuration
//!
//! Every tunable of a run lives in one JSON file. All fields are optional:
//!
//! ```json
//! {
//!   "sources": [ { "name": "natasha", "weight": 1.0 }, { "name": "bert", "weight": 1.3 } ],
//!   "merge_mode": "consensus",
//!   "consensus_threshold": 0.4,
//!   "overlap_threshold": 1.0,
//!   "resolver": "priority",
//!   "entity_types": ["PERSON", "PHONE", "SNILS"],
//!   "refine_predictions": true
//! }
//! ```
//!
//! Components never read the config themselves; the binary builds each one
//! from its piece ([`EvalConfig::merger`], [`EvalConfig::policy`], ...).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consensus::{ConsensusMerger, MergeMode, WeightedSource};
use crate::error::Result;
use crate::matcher::MatchPolicy;
use crate::priority::PriorityTable;
use crate::resolver::OverlapResolver;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeModeKind {
    #[default]
    Consensus,
    Union,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    #[default]
    LongestFirst,
    Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalConfig {
    /// Recognizers and their vote weights
    pub sources: Vec<WeightedSource>,
    pub merge_mode: MergeModeKind,
    /// Minimum vote share, used in consensus mode
    pub consensus_threshold: f64,
    /// `1.0` for strict matching, below for relaxed IoU
    pub overlap_threshold: f64,
    pub resolver: ResolverKind,
    /// Used when `resolver` is `priority`
    pub priorities: PriorityTable,
    /// Types reported even when a run never sees them
    pub entity_types: Vec<String>,
    /// Merge split names and tighten ages before evaluation
    pub refine_predictions: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                WeightedSource::new("natasha", 1.0),
                WeightedSource::new("spacy", 1.1),
                WeightedSource::new("bert", 1.3),
                WeightedSource::new("regexp", 0.7),
            ],
            merge_mode: MergeModeKind::Consensus,
            consensus_threshold: 0.4,
            overlap_threshold: 1.0,
            resolver: ResolverKind::LongestFirst,
            priorities: PriorityTable::regex_baseline(),
            entity_types: Vec::new(),
            refine_predictions: false,
        }
    }
}

impl EvalConfig {
    /// Reads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value by building the components that consume it.
    pub fn validate(&self) -> Result<()> {
        self.merger()?;
        self.policy()?;
        Ok(())
    }

    pub fn merge_mode(&self) -> MergeMode {
        match self.merge_mode {
            MergeModeKind::Consensus => MergeMode::Consensus {
                threshold: self.consensus_threshold,
            },
            MergeModeKind::Union => MergeMode::Union,
        }
    }

    pub fn resolver(&self) -> OverlapResolver {
        match self.resolver {
            ResolverKind::LongestFirst => OverlapResolver::longest_first(),
            ResolverKind::Priority => OverlapResolver::with_priorities(self.priorities.clone()),
        }
    }

    pub fn merger(&self) -> Result<ConsensusMerger> {
        ConsensusMerger::new(self.sources.clone(), self.merge_mode(), self.resolver())
    }

    pub fn policy(&self) -> Result<MatchPolicy> {
        MatchPolicy::from_threshold(self.overlap_threshold)
    }
}
