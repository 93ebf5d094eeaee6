//! Embedding and similarity gateway.

use crate::driver::{GraphDriver, ScoredConcept, SimilarityQuery};
use crate::embedder::{EmbedderClient, Embedding};
use crate::errors::Result;

use super::{with_retry, RetryPolicy};

/// Embeds text and ranks committed concepts against a vector.
///
/// Both calls run under the gateway [`RetryPolicy`]. Driver results are not
/// trusted as-is: scores are clamped to `[0, 1]`, filtered by the floor,
/// sorted descending and truncated to `top_k`.
pub struct SimilarityGateway<'a, E, G> {
    embedder: &'a E,
    driver: &'a G,
    policy: &'a RetryPolicy,
}

impl<'a, E: EmbedderClient, G: GraphDriver> SimilarityGateway<'a, E, G> {
    pub fn new(embedder: &'a E, driver: &'a G, policy: &'a RetryPolicy) -> Self {
        Self {
            embedder,
            driver,
            policy,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        with_retry(self.policy, "embed", || self.embedder.embed(text)).await
    }

    pub async fn embed_many(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retry(self.policy, "embed_many", || self.embedder.embed_batch(texts)).await
    }

    pub async fn nearest(
        &self,
        embedding: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredConcept>> {
        if embedding.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query = SimilarityQuery {
            embedding: embedding.to_vec(),
            top_k,
            min_score,
        };
        let hits = with_retry(self.policy, "nearest", || self.driver.nearest_concepts(&query)).await?;
        Ok(sanitize_hits(hits, top_k, min_score))
    }
}

fn sanitize_hits(hits: Vec<ScoredConcept>, top_k: usize, min_score: f32) -> Vec<ScoredConcept> {
    let mut hits: Vec<ScoredConcept> = hits
        .into_iter()
        .filter(|h| !h.score.is_nan())
        .map(|mut h| {
            h.score = h.score.clamp(0.0, 1.0);
            h
        })
        .filter(|h| h.score >= min_score)
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::InMemoryDriver;
    use crate::nodes::ConceptNode;
    use crate::testing::HashEmbedder;
    use chrono::Utc;
    use uuid::Uuid;

    fn hit(score: f32) -> ScoredConcept {
        ScoredConcept {
            id: Uuid::new_v4(),
            title: format!("{score}"),
            summary: String::new(),
            score,
        }
    }

    #[test]
    fn sanitize_clamps_filters_sorts_and_truncates() {
        let hits = vec![hit(0.6), hit(1.4), hit(f32::NAN), hit(0.2), hit(0.9)];
        let out = sanitize_hits(hits, 2, 0.5);
        let scores: Vec<f32> = out.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![1.0, 0.9]);
    }

    #[tokio::test]
    async fn nearest_finds_embedded_concept() {
        let embedder = HashEmbedder::new(64);
        let driver = InMemoryDriver::new();
        let policy = RetryPolicy::default();
        let gw = SimilarityGateway::new(&embedder, &driver, &policy);

        let text = "virtue is the only good";
        driver.insert_concept(ConceptNode {
            id: Uuid::new_v4(),
            title: "Virtue".to_string(),
            short_summary: text.to_string(),
            long_summary: text.to_string(),
            embedding: gw.embed(text).await.unwrap(),
            created_at: Utc::now(),
            run_id: None,
        });

        let query = gw.embed(text).await.unwrap();
        let hits = gw.nearest(&query, 5, 0.9).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Virtue");
        assert!(gw.nearest(&[], 5, 0.0).await.unwrap().is_empty());
    }
}
