//! # Priority Table: Type Precedence for Conflicting Spans
//!
//! When two spans of **different** types claim the same characters, the
//! priority resolver keeps the one whose type ranks higher. The reference
//! ranking favors structured identifiers, which regexes match with near
//! certainty, over free-text types:
//!
//! | Priority | Types                     |
//! |----------|---------------------------|
//! | 10       | PHONE, EMAIL              |
//! | 9        | PASSPORT, SNILS           |
//! | 8        | INN, BANK_CARD            |
//! | 7        | BIRTHDAY, PERSON          |
//! | 5        | IP_ADDRESS, URL           |
//! | 4        | CAR_NUMBER                |
//! | 3        | AGE                       |
//! | 1        | anything else (default)   |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-type numeric priority; higher wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityTable {
    pub priorities: HashMap<String, i32>,
    #[serde(default = "default_priority")]
    pub default_priority: i32,
}

fn default_priority() -> i32 {
    1
}

impl PriorityTable {
    /// An empty table where every type gets `default_priority`.
    pub fn new(default_priority: i32) -> Self {
        Self {
            priorities: HashMap::new(),
            default_priority,
        }
    }

    /// The ranking used by the regex recognizer family.
    pub fn regex_baseline() -> Self {
        [
            ("PHONE", 10),
            ("EMAIL", 10),
            ("PASSPORT", 9),
            ("SNILS", 9),
            ("INN", 8),
            ("BANK_CARD", 8),
            ("BIRTHDAY", 7),
            ("PERSON", 7),
            ("IP_ADDRESS", 5),
            ("URL", 5),
            ("CAR_NUMBER", 4),
            ("AGE", 3),
        ]
        .into_iter()
        .fold(Self::new(default_priority()), |table, (ty, p)| table.with(ty, p))
    }

    pub fn with(mut self, entity_type: impl Into<String>, priority: i32) -> Self {
        self.priorities.insert(entity_type.into(), priority);
        self
    }

    pub fn priority(&self, entity_type: &str) -> i32 {
        self.priorities
            .get(entity_type)
            .copied()
            .unwrap_or(self.default_priority)
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::regex_baseline()
    }
}
