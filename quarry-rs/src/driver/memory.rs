//! In-memory graph driver.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::edges::{ConceptEdge, EvidenceLink, RelationKind};
use crate::errors::{QuarryError, Result};
use crate::nodes::{ConceptNode, SourceUnit, SourceUnitId};
use crate::utils::similarity_score;

use super::{GraphDriver, ScoredConcept, SimilarityQuery};

/// A [`GraphDriver`] holding the whole graph in process memory.
///
/// Clones share the same graph, so a test can hand one clone to the engine
/// and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDriver {
    inner: Arc<Graph>,
}

#[derive(Debug, Default)]
struct Graph {
    concepts: DashMap<Uuid, ConceptNode>,
    relations: DashMap<(Uuid, Uuid, RelationKind), ConceptEdge>,
    sources: DashMap<SourceUnitId, SourceUnit>,
    evidence: DashSet<EvidenceLink>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing concept, as if committed by an earlier run.
    pub fn insert_concept(&self, node: ConceptNode) {
        self.inner.concepts.insert(node.id, node);
    }

    pub fn concept_count(&self) -> usize {
        self.inner.concepts.len()
    }

    pub fn concepts(&self) -> Vec<ConceptNode> {
        let mut nodes: Vec<_> = self.inner.concepts.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.title.cmp(&b.title));
        nodes
    }

    pub fn find_by_title(&self, title: &str) -> Option<ConceptNode> {
        self.inner
            .concepts
            .iter()
            .find(|e| e.value().title == title)
            .map(|e| e.value().clone())
    }

    /// All edges, sorted by key.
    pub fn relations(&self) -> Vec<ConceptEdge> {
        let mut edges: Vec<_> = self.inner.relations.iter().map(|e| e.value().clone()).collect();
        edges.sort_by_key(|e| e.key());
        edges
    }

    pub fn has_relation(&self, source: Uuid, target: Uuid, kind: RelationKind) -> bool {
        self.inner.relations.contains_key(&(source, target, kind))
    }

    pub fn evidence(&self) -> BTreeSet<EvidenceLink> {
        self.inner.evidence.iter().map(|e| e.key().clone()).collect()
    }

    pub fn evidence_for(&self, concept_id: Uuid) -> BTreeSet<SourceUnitId> {
        self.inner
            .evidence
            .iter()
            .filter(|e| e.key().concept_id == concept_id)
            .map(|e| e.key().source_unit_id.clone())
            .collect()
    }
}

impl GraphDriver for InMemoryDriver {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn create_concept(&self, node: &ConceptNode) -> Result<()> {
        self.inner
            .concepts
            .entry(node.id)
            .or_insert_with(|| node.clone());
        Ok(())
    }

    async fn get_concept(&self, id: Uuid) -> Result<Option<ConceptNode>> {
        Ok(self.inner.concepts.get(&id).map(|e| e.value().clone()))
    }

    async fn create_relation(&self, edge: &ConceptEdge) -> Result<()> {
        for endpoint in [edge.source_id, edge.target_id] {
            if !self.inner.concepts.contains_key(&endpoint) {
                return Err(QuarryError::NodeNotFound(endpoint.to_string()));
            }
        }
        self.inner
            .relations
            .entry(edge.key())
            .or_insert_with(|| edge.clone());
        Ok(())
    }

    async fn create_evidence(&self, source: &SourceUnit, link: &EvidenceLink) -> Result<()> {
        if !self.inner.concepts.contains_key(&link.concept_id) {
            return Err(QuarryError::NodeNotFound(link.concept_id.to_string()));
        }
        self.inner
            .sources
            .entry(source.id.clone())
            .or_insert_with(|| source.clone());
        self.inner.evidence.insert(link.clone());
        Ok(())
    }

    async fn nearest_concepts(&self, query: &SimilarityQuery) -> Result<Vec<ScoredConcept>> {
        let nodes: Vec<ConceptNode> = self.inner.concepts.iter().map(|e| e.value().clone()).collect();
        Ok(rank_nearest(&nodes, query))
    }
}

/// Brute-force nearest-neighbour ranking over `nodes`.
///
/// Nodes without an embedding never match. Ties are broken by id so results
/// are deterministic.
pub fn rank_nearest(nodes: &[ConceptNode], query: &SimilarityQuery) -> Vec<ScoredConcept> {
    let mut scored: Vec<ScoredConcept> = nodes
        .iter()
        .filter(|n| !n.embedding.is_empty() && n.embedding.len() == query.embedding.len())
        .map(|n| ScoredConcept {
            id: n.id,
            title: n.title.clone(),
            summary: n.short_summary.clone(),
            score: similarity_score(&query.embedding, &n.embedding),
        })
        .filter(|s| s.score >= query.min_score)
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(query.top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(title: &str, embedding: Vec<f32>) -> ConceptNode {
        ConceptNode {
            id: Uuid::new_v4(),
            title: title.to_string(),
            short_summary: format!("{title} summary"),
            long_summary: String::new(),
            embedding,
            created_at: Utc::now(),
            run_id: None,
        }
    }

    #[tokio::test]
    async fn create_concept_is_idempotent_by_id() {
        let driver = InMemoryDriver::new();
        let mut n = node("Stoicism", vec![1.0, 0.0]);
        driver.create_concept(&n).await.unwrap();
        n.title = "Renamed".to_string();
        driver.create_concept(&n).await.unwrap();

        assert_eq!(driver.concept_count(), 1);
        let stored = driver.get_concept(n.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Stoicism");
    }

    #[tokio::test]
    async fn relation_requires_both_endpoints() {
        let driver = InMemoryDriver::new();
        let a = node("A", vec![1.0]);
        driver.create_concept(&a).await.unwrap();
        let [edge, _] =
            ConceptEdge::bidirectional(a.id, Uuid::new_v4(), RelationKind::PartOf, "x", 0.9).unwrap();
        assert!(matches!(
            driver.create_relation(&edge).await,
            Err(QuarryError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn relations_and_evidence_deduplicate() {
        let driver = InMemoryDriver::new();
        let (a, b) = (node("A", vec![1.0]), node("B", vec![1.0]));
        driver.create_concept(&a).await.unwrap();
        driver.create_concept(&b).await.unwrap();

        let edges = ConceptEdge::bidirectional(a.id, b.id, RelationKind::Enables, "x", 0.8).unwrap();
        for _ in 0..2 {
            for edge in &edges {
                driver.create_relation(edge).await.unwrap();
            }
        }
        assert_eq!(driver.relations().len(), 2);
        assert!(driver.has_relation(b.id, a.id, RelationKind::EnabledBy));

        let source = SourceUnit::new("q1", "quote");
        let link = EvidenceLink::new(source.id.clone(), a.id);
        driver.create_evidence(&source, &link).await.unwrap();
        driver.create_evidence(&source, &link).await.unwrap();
        assert_eq!(driver.evidence().len(), 1);
        assert_eq!(driver.evidence_for(a.id), BTreeSet::from([SourceUnitId::from("q1")]));
    }

    #[test]
    fn rank_nearest_orders_filters_and_truncates() {
        let nodes = vec![
            node("same", vec![1.0, 0.0]),
            node("close", vec![0.9, 0.1]),
            node("opposite", vec![-1.0, 0.0]),
            node("unembedded", vec![]),
        ];
        let query = SimilarityQuery {
            embedding: vec![1.0, 0.0],
            top_k: 2,
            min_score: 0.5,
        };
        let ranked = rank_nearest(&nodes, &query);
        let titles: Vec<_> = ranked.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["same", "close"]);
        assert!(ranked[0].score >= ranked[1].score);
        assert!(ranked.iter().all(|s| (0.0..=1.0).contains(&s.score)));
    }
}
