//! ConceptNode: a committed concept in the graph store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::nodes::candidate::CandidateConcept;
use crate::utils::text::{normalize_whitespace, truncate_with_ellipsis};

/// Maximum length (in characters) of a derived short summary.
pub const SHORT_SUMMARY_CHARS: usize = 160;

/// An atomic, named unit of meaning persisted as a graph node.
///
/// Immutable once committed within a run; updates belong to a different
/// workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptNode {
    pub id: Uuid,
    pub title: String,
    pub short_summary: String,
    pub long_summary: String,
    /// Similarity vector of `title + body`. Empty when embedding failed.
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    /// Run that created this node.
    pub run_id: Option<Uuid>,
}

impl ConceptNode {
    /// Build the node a novel candidate becomes at commit time.
    pub fn from_candidate(
        id: Uuid,
        candidate: &CandidateConcept,
        embedding: Vec<f32>,
        run_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: candidate.title.clone(),
            short_summary: short_summary(&candidate.body),
            long_summary: candidate.body.clone(),
            embedding,
            created_at,
            run_id: Some(run_id),
        }
    }
}

/// First sentence of `body`, whitespace-normalized and capped at
/// [`SHORT_SUMMARY_CHARS`].
pub fn short_summary(body: &str) -> String {
    let normalized = normalize_whitespace(body);
    let first = match normalized.find(". ") {
        Some(end) => &normalized[..=end],
        None => normalized.as_str(),
    };
    truncate_with_ellipsis(first, SHORT_SUMMARY_CHARS)
}
