//! Mirror writer abstraction.
//!
//! The mirror is a best-effort secondary copy of every committed concept in
//! a human-readable form. It is written after the graph store and never rolls
//! the graph back: a failed write surfaces as [`MirrorError`] and the node is
//! flagged `mirror_pending`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::edges::RelationKind;
use crate::errors::MirrorError;
use crate::nodes::{ConceptNode, SourceUnit};

/// Maps node ids to titles for rendering links.
#[derive(Debug, Clone, Default)]
pub struct TitleResolver {
    titles: BTreeMap<Uuid, String>,
}

impl TitleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: Uuid, title: impl Into<String>) {
        self.titles.insert(id, title.into());
    }

    pub fn resolve(&self, id: Uuid) -> Option<&str> {
        self.titles.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

impl FromIterator<(Uuid, String)> for TitleResolver {
    fn from_iter<I: IntoIterator<Item = (Uuid, String)>>(iter: I) -> Self {
        Self {
            titles: iter.into_iter().collect(),
        }
    }
}

/// A relation as seen from the mirrored node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MirrorLink {
    pub kind: RelationKind,
    pub node_id: Uuid,
}

/// Everything needed to render one committed concept.
#[derive(Debug, Clone)]
pub struct ConceptMirror<'a> {
    pub node: &'a ConceptNode,
    /// Edges leaving the node.
    pub outgoing: Vec<MirrorLink>,
    /// Edges arriving at the node.
    pub incoming: Vec<MirrorLink>,
    /// Fragments supporting the node.
    pub evidence: Vec<&'a SourceUnit>,
    pub titles: &'a TitleResolver,
}

/// Where a mirror write landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorReceipt {
    pub node_id: Uuid,
    pub location: String,
}

#[allow(async_fn_in_trait)]
pub trait MirrorWriter: Send + Sync {
    /// Write (or overwrite) the representation of one node.
    async fn write_concept(&self, concept: &ConceptMirror<'_>) -> Result<MirrorReceipt, MirrorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_collects_titles() {
        let id = Uuid::new_v4();
        let titles: TitleResolver = [(id, "Virtue".to_string())].into_iter().collect();
        assert_eq!(titles.resolve(id), Some("Virtue"));
        assert_eq!(titles.resolve(Uuid::nil()), None);
        assert_eq!(titles.len(), 1);
    }
}
