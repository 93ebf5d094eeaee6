//! Neo4j graph driver.
//!
//! Uses `neo4rs` 0.8 for async, pooled Bolt connections. Concepts are
//! `(:Concept)` nodes with a cosine vector index `concept_embedding`;
//! fragments are `(:SourceUnit)` nodes linked by `[:SUPPORTS]`.

use neo4rs::{query, Graph, Query};
use tracing::{debug, info};
use uuid::Uuid;

use crate::edges::{ConceptEdge, EvidenceLink, RelationKind};
use crate::errors::{QuarryError, Result};
use crate::nodes::{ConceptNode, SourceUnit};
use crate::utils::{format_graph_datetime, parse_graph_datetime};

use super::{GraphDriver, ScoredConcept, SimilarityQuery};

/// Name of the vector index over `Concept.embedding`.
pub const VECTOR_INDEX: &str = "concept_embedding";

pub struct Neo4jDriver {
    graph: Graph,
}

fn driver_err(err: neo4rs::Error) -> QuarryError {
    QuarryError::Driver(err.to_string())
}

impl Neo4jDriver {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password).await.map_err(driver_err)?;
        info!(uri, "connected to Neo4j");
        Ok(Self { graph })
    }

    /// Create the id constraint and the vector index if missing.
    pub async fn ensure_schema(&self, embedding_dim: usize) -> Result<()> {
        self.graph
            .run(query(
                "CREATE CONSTRAINT concept_id IF NOT EXISTS FOR (c:Concept) REQUIRE c.id IS UNIQUE",
            ))
            .await
            .map_err(driver_err)?;
        self.graph
            .run(query(
                "CREATE CONSTRAINT source_unit_id IF NOT EXISTS FOR (s:SourceUnit) REQUIRE s.id IS UNIQUE",
            ))
            .await
            .map_err(driver_err)?;
        self.graph
            .run(query(&vector_index_statement(embedding_dim)))
            .await
            .map_err(driver_err)?;
        debug!(embedding_dim, "Neo4j schema ensured");
        Ok(())
    }

    /// Run `q` and return the first row, if any.
    async fn first_row(&self, q: Query) -> Result<Option<neo4rs::Row>> {
        let mut stream = self.graph.execute(q).await.map_err(driver_err)?;
        stream.next().await.map_err(driver_err)
    }
}

fn vector_index_statement(dim: usize) -> String {
    format!(
        "CREATE VECTOR INDEX {VECTOR_INDEX} IF NOT EXISTS \
         FOR (c:Concept) ON c.embedding \
         OPTIONS {{indexConfig: {{`vector.dimensions`: {dim}, `vector.similarity_function`: 'cosine'}}}}"
    )
}

/// Relationship types cannot be parameters; the label comes from the closed
/// [`RelationKind`] enum.
fn relation_statement(kind: RelationKind) -> String {
    format!(
        "MATCH (s:Concept {{id: $source}}), (t:Concept {{id: $target}}) \
         MERGE (s)-[r:{}]->(t) \
         ON CREATE SET r.explanation = $explanation, r.confidence = $confidence \
         RETURN count(r) AS written",
        kind.label()
    )
}

fn embedding_to_f64(embedding: &[f32]) -> Vec<f64> {
    embedding.iter().map(|&v| v as f64).collect()
}

impl GraphDriver for Neo4jDriver {
    async fn ping(&self) -> Result<()> {
        self.first_row(query("RETURN 1 AS ok")).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // The pool closes its connections on drop.
        Ok(())
    }

    async fn create_concept(&self, node: &ConceptNode) -> Result<()> {
        let q = query(
            "MERGE (c:Concept {id: $id})
             ON CREATE SET c.title = $title,
                           c.short_summary = $short_summary,
                           c.long_summary = $long_summary,
                           c.embedding = CASE WHEN size($embedding) = 0 THEN null ELSE $embedding END,
                           c.created_at = $created_at,
                           c.run_id = $run_id",
        )
        .param("id", node.id.to_string())
        .param("title", node.title.as_str())
        .param("short_summary", node.short_summary.as_str())
        .param("long_summary", node.long_summary.as_str())
        .param("embedding", embedding_to_f64(&node.embedding))
        .param("created_at", format_graph_datetime(&node.created_at))
        .param(
            "run_id",
            node.run_id.map(|r| r.to_string()).unwrap_or_default(),
        );
        self.graph.run(q).await.map_err(driver_err)
    }

    async fn get_concept(&self, id: Uuid) -> Result<Option<ConceptNode>> {
        let q = query(
            "MATCH (c:Concept {id: $id})
             RETURN c.title AS title, c.short_summary AS short_summary,
                    c.long_summary AS long_summary, coalesce(c.embedding, []) AS embedding,
                    c.created_at AS created_at, coalesce(c.run_id, '') AS run_id",
        )
        .param("id", id.to_string());

        let Some(row) = self.first_row(q).await? else {
            return Ok(None);
        };
        let created_at: String = row.get("created_at").unwrap_or_default();
        let run_id: String = row.get("run_id").unwrap_or_default();
        let embedding: Vec<f64> = row.get("embedding").unwrap_or_default();
        Ok(Some(ConceptNode {
            id,
            title: row.get("title").unwrap_or_default(),
            short_summary: row.get("short_summary").unwrap_or_default(),
            long_summary: row.get("long_summary").unwrap_or_default(),
            embedding: embedding.into_iter().map(|v| v as f32).collect(),
            created_at: parse_graph_datetime(&created_at).unwrap_or_default(),
            run_id: Uuid::parse_str(&run_id).ok(),
        }))
    }

    async fn create_relation(&self, edge: &ConceptEdge) -> Result<()> {
        let q = query(&relation_statement(edge.kind))
            .param("source", edge.source_id.to_string())
            .param("target", edge.target_id.to_string())
            .param("explanation", edge.explanation.as_str())
            .param("confidence", edge.confidence);

        let written: i64 = match self.first_row(q).await? {
            Some(row) => row.get("written").unwrap_or(0),
            None => 0,
        };
        if written == 0 {
            return Err(QuarryError::NodeNotFound(format!(
                "{} or {}",
                edge.source_id, edge.target_id
            )));
        }
        Ok(())
    }

    async fn create_evidence(&self, source: &SourceUnit, link: &EvidenceLink) -> Result<()> {
        let q = query(
            "MATCH (c:Concept {id: $concept_id})
             MERGE (s:SourceUnit {id: $source_id})
             ON CREATE SET s.text = $text, s.attribution = $attribution
             MERGE (s)-[:SUPPORTS]->(c)
             RETURN c.id AS id",
        )
        .param("concept_id", link.concept_id.to_string())
        .param("source_id", link.source_unit_id.as_str())
        .param("text", source.text.as_str())
        .param("attribution", source.attribution.clone().unwrap_or_default());

        match self.first_row(q).await? {
            Some(_) => Ok(()),
            None => Err(QuarryError::NodeNotFound(link.concept_id.to_string())),
        }
    }

    async fn nearest_concepts(&self, sq: &SimilarityQuery) -> Result<Vec<ScoredConcept>> {
        if sq.embedding.is_empty() || sq.top_k == 0 {
            return Ok(Vec::new());
        }
        let q = query(&format!(
            "CALL db.index.vector.queryNodes('{VECTOR_INDEX}', $k, $embedding)
             YIELD node, score
             WHERE score >= $min_score
             RETURN node.id AS id, node.title AS title, node.short_summary AS summary, score
             ORDER BY score DESC"
        ))
        .param("k", sq.top_k as i64)
        .param("embedding", embedding_to_f64(&sq.embedding))
        .param("min_score", sq.min_score as f64);

        let mut stream = self.graph.execute(q).await.map_err(driver_err)?;
        let mut hits = Vec::new();
        while let Some(row) = stream.next().await.map_err(driver_err)? {
            let id_str: String = row.get("id").unwrap_or_default();
            let Ok(id) = Uuid::parse_str(&id_str) else {
                debug!(id = %id_str, "skipping concept with malformed id");
                continue;
            };
            let score: f64 = row.get("score").unwrap_or(0.0);
            hits.push(ScoredConcept {
                id,
                title: row.get("title").unwrap_or_default(),
                summary: row.get("summary").unwrap_or_default(),
                score: score as f32,
            });
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_statement_uses_kind_label() {
        let stmt = relation_statement(RelationKind::HasPart);
        assert!(stmt.contains("MERGE (s)-[r:HAS_PART]->(t)"));
        assert!(stmt.contains("ON CREATE SET"));
    }

    #[test]
    fn vector_index_statement_embeds_dimension() {
        let stmt = vector_index_statement(1536);
        assert!(stmt.contains("`vector.dimensions`: 1536"));
        assert!(stmt.contains(VECTOR_INDEX));
        assert!(stmt.contains("'cosine'"));
    }
}
