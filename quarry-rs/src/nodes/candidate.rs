//! CandidateConcept: a run-scoped concept proposal.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::source::SourceUnitId;

/// Temporary identifier of a candidate, unique within one workflow run.
///
/// Formatted `c{generation}.{index}`; every extraction or refinement pass
/// starts a new generation, so ids are never reused inside a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(pub String);

impl TempId {
    pub fn new(generation: u32, index: usize) -> Self {
        Self(format!("c{generation}.{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TempId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A concept proposed by extraction or refinement, not yet deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConcept {
    pub temp_id: TempId,
    pub title: String,
    pub body: String,
    pub rationale: String,
    /// Fragments this candidate was extracted from.
    pub source_unit_ids: BTreeSet<SourceUnitId>,
}

impl CandidateConcept {
    /// Text embedded for similarity lookups.
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}
