//! Graph database driver abstraction.
//!
//! Defines the [`GraphDriver`] trait that every backend implements:
//! - [`memory::InMemoryDriver`]: dashmap-backed, used by tests and benches.
//! - [`neo4j::Neo4jDriver`]: Neo4j over Bolt with a vector index.
//!
//! Every write is idempotent: concepts by id, relations by
//! `(source, target, kind)`, evidence by `(source unit, concept)`. The commit
//! stage relies on this to retry a failed step from its start.

pub mod memory;
pub mod neo4j;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::edges::{ConceptEdge, EvidenceLink};
use crate::errors::Result;
use crate::nodes::{ConceptNode, SourceUnit};

pub use memory::InMemoryDriver;
pub use neo4j::Neo4jDriver;

/// A nearest-neighbour lookup over committed concepts.
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    pub embedding: Vec<f32>,
    pub top_k: usize,
    /// Minimum score in `[0, 1]`.
    pub min_score: f32,
}

/// A committed concept returned by a similarity lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredConcept {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub score: f32,
}

/// Trait representing a graph database backend.
#[allow(async_fn_in_trait)]
pub trait GraphDriver: Send + Sync {
    /// Health check: verify connectivity to the database.
    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Create a concept node. A node with the same id is left untouched.
    async fn create_concept(&self, node: &ConceptNode) -> Result<()>;

    async fn get_concept(&self, id: Uuid) -> Result<Option<ConceptNode>>;

    /// Create one directed edge. Both endpoints must exist.
    async fn create_relation(&self, edge: &ConceptEdge) -> Result<()>;

    /// Record that `source` supports `link.concept_id`, storing the fragment
    /// itself on first sight.
    async fn create_evidence(&self, source: &SourceUnit, link: &EvidenceLink) -> Result<()>;

    /// Concepts ranked by descending score, at most `top_k`, none below
    /// `min_score`.
    async fn nearest_concepts(&self, query: &SimilarityQuery) -> Result<Vec<ScoredConcept>>;
}
