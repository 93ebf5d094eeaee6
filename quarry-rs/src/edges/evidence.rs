//! EvidenceLink: SUPPORTS relationship (SourceUnit → ConceptNode).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::nodes::SourceUnitId;

/// "This fragment supports this concept."
///
/// Always unidirectional and outside the relation algebra. Identity is the
/// `(source_unit_id, concept_id)` pair, so writing the same link twice is a
/// no-op in every driver.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvidenceLink {
    pub source_unit_id: SourceUnitId,
    pub concept_id: Uuid,
}

impl EvidenceLink {
    pub fn new(source_unit_id: SourceUnitId, concept_id: Uuid) -> Self {
        Self {
            source_unit_id,
            concept_id,
        }
    }
}
