//! The relation algebra: 9 closed relation kinds and their reciprocals.
//!
//! Kinds are partitioned into three reciprocal pairs, whose reverse direction
//! carries a different label, and three self-reciprocal kinds, whose reverse
//! direction carries the same label:
//!
//! | Kind          | Reciprocal    |
//! |---------------|---------------|
//! | `PART_OF`     | `HAS_PART`    |
//! | `GENERALIZES` | `SPECIALIZES` |
//! | `ENABLES`     | `ENABLED_BY`  |
//! | `SIMILAR_TO`  | `SIMILAR_TO`  |
//! | `CONTRADICTS` | `CONTRADICTS` |
//! | `COMPLEMENTS` | `COMPLEMENTS` |

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{QuarryError, Result};
use crate::nodes::TempId;

/// One of the nine relation kinds. Never extended at runtime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    PartOf,
    HasPart,
    Generalizes,
    Specializes,
    Enables,
    EnabledBy,
    SimilarTo,
    Contradicts,
    Complements,
}

impl RelationKind {
    pub const ALL: [RelationKind; 9] = [
        RelationKind::PartOf,
        RelationKind::HasPart,
        RelationKind::Generalizes,
        RelationKind::Specializes,
        RelationKind::Enables,
        RelationKind::EnabledBy,
        RelationKind::SimilarTo,
        RelationKind::Contradicts,
        RelationKind::Complements,
    ];

    /// The kind carried by the reverse edge.
    pub const fn reciprocal(self) -> RelationKind {
        match self {
            RelationKind::PartOf => RelationKind::HasPart,
            RelationKind::HasPart => RelationKind::PartOf,
            RelationKind::Generalizes => RelationKind::Specializes,
            RelationKind::Specializes => RelationKind::Generalizes,
            RelationKind::Enables => RelationKind::EnabledBy,
            RelationKind::EnabledBy => RelationKind::Enables,
            RelationKind::SimilarTo => RelationKind::SimilarTo,
            RelationKind::Contradicts => RelationKind::Contradicts,
            RelationKind::Complements => RelationKind::Complements,
        }
    }

    pub const fn is_self_reciprocal(self) -> bool {
        matches!(
            self,
            RelationKind::SimilarTo | RelationKind::Contradicts | RelationKind::Complements
        )
    }

    /// Wire / graph label, e.g. `"PART_OF"`.
    pub const fn label(self) -> &'static str {
        match self {
            RelationKind::PartOf => "PART_OF",
            RelationKind::HasPart => "HAS_PART",
            RelationKind::Generalizes => "GENERALIZES",
            RelationKind::Specializes => "SPECIALIZES",
            RelationKind::Enables => "ENABLES",
            RelationKind::EnabledBy => "ENABLED_BY",
            RelationKind::SimilarTo => "SIMILAR_TO",
            RelationKind::Contradicts => "CONTRADICTS",
            RelationKind::Complements => "COMPLEMENTS",
        }
    }

    /// Phrase appended to a concept's text when searching for nodes that
    /// could sit at the other end of this kind of edge.
    pub const fn query_phrase(self) -> &'static str {
        match self {
            RelationKind::PartOf => "a broader whole this is a component of",
            RelationKind::HasPart => "a component or constituent of this",
            RelationKind::Generalizes => "a more specific case of this idea",
            RelationKind::Specializes => "a more general principle behind this idea",
            RelationKind::Enables => "something this makes possible",
            RelationKind::EnabledBy => "a precondition that makes this possible",
            RelationKind::SimilarTo => "a closely resembling idea",
            RelationKind::Contradicts => "an opposing or incompatible idea",
            RelationKind::Complements => "an idea that completes or balances this",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RelationKind {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        RelationKind::ALL
            .into_iter()
            .find(|k| k.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QuarryError::Validation(format!("unknown relation kind: {s}")))
    }
}

/// One end of a proposed relation: a candidate of this run or an existing node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationEndpoint {
    Candidate { temp_id: TempId },
    Existing { node_id: Uuid },
}

impl RelationEndpoint {
    pub fn candidate(temp_id: TempId) -> Self {
        RelationEndpoint::Candidate { temp_id }
    }

    pub fn existing(node_id: Uuid) -> Self {
        RelationEndpoint::Existing { node_id }
    }
}

impl fmt::Display for RelationEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationEndpoint::Candidate { temp_id } => write!(f, "candidate:{temp_id}"),
            RelationEndpoint::Existing { node_id } => write!(f, "node:{node_id}"),
        }
    }
}

/// A typed relation proposed during relation derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationProposal {
    pub source: RelationEndpoint,
    pub target: RelationEndpoint,
    pub kind: RelationKind,
    pub explanation: String,
    pub confidence: f64,
}

impl RelationProposal {
    /// Build a proposal, rejecting self-relations.
    pub fn new(
        source: RelationEndpoint,
        target: RelationEndpoint,
        kind: RelationKind,
        explanation: impl Into<String>,
        confidence: f64,
    ) -> Result<Self> {
        if source == target {
            return Err(QuarryError::Validation(format!(
                "self-relation rejected: {source} -[{kind}]-> {target}"
            )));
        }
        Ok(Self {
            source,
            target,
            kind,
            explanation: explanation.into(),
            confidence,
        })
    }

    /// Identity used to merge repeated proposals.
    pub fn key(&self) -> (RelationEndpoint, RelationEndpoint, RelationKind) {
        (self.source.clone(), self.target.clone(), self.kind)
    }
}

/// A resolved, directed edge between two committed concepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptEdge {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub kind: RelationKind,
    pub explanation: String,
    pub confidence: f64,
}

impl ConceptEdge {
    /// Both directions of an edge per the relation algebra.
    ///
    /// Returns the forward edge and its reciprocal; fails for self-relations.
    pub fn bidirectional(
        source_id: Uuid,
        target_id: Uuid,
        kind: RelationKind,
        explanation: &str,
        confidence: f64,
    ) -> Result<[ConceptEdge; 2]> {
        if source_id == target_id {
            return Err(QuarryError::Validation(format!(
                "self-relation rejected on node {source_id}"
            )));
        }
        Ok([
            ConceptEdge {
                source_id,
                target_id,
                kind,
                explanation: explanation.to_string(),
                confidence,
            },
            ConceptEdge {
                source_id: target_id,
                target_id: source_id,
                kind: kind.reciprocal(),
                explanation: explanation.to_string(),
                confidence,
            },
        ])
    }

    /// Identity used for idempotent writes.
    pub fn key(&self) -> (Uuid, Uuid, RelationKind) {
        (self.source_id, self.target_id, self.kind)
    }
}
