//! Deduplication stage.
//!
//! Each candidate is judged independently: embed `title + body`, fetch the
//! nearest committed concepts above the floor, and ask the model whether
//! one of them already names the same idea. A branch never fails: any error
//! turns into a novel verdict plus a warning, so no candidate is dropped.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{GraphDriver, ScoredConcept};
use crate::embedder::EmbedderClient;
use crate::gateway::{SimilarityGateway, StructuredGateway};
use crate::llm_client::LlmClient;
use crate::nodes::{CandidateConcept, SourceUnitId, TempId};
use crate::prompts::dedupe::duplicate_request;
use crate::prompts::DuplicateJudgement;
use crate::types::WorkflowConfig;

use super::superstep::run_superstep;

/// Outcome of deduplicating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub temp_id: TempId,
    pub is_duplicate: bool,
    pub matched_node_id: Option<Uuid>,
    #[serde(default)]
    pub matched_title: Option<String>,
    pub confidence: f64,
    /// Fragments whose evidence moves to the matched node. Empty when novel.
    pub reassigned_source_ids: BTreeSet<SourceUnitId>,
    #[serde(default)]
    pub reasoning: String,
}

impl DuplicateVerdict {
    pub fn novel(temp_id: TempId, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            temp_id,
            is_duplicate: false,
            matched_node_id: None,
            matched_title: None,
            confidence,
            reassigned_source_ids: BTreeSet::new(),
            reasoning: reasoning.into(),
        }
    }

    fn duplicate(candidate: &CandidateConcept, matched: &ScoredConcept, confidence: f64, reasoning: String) -> Self {
        Self {
            temp_id: candidate.temp_id.clone(),
            is_duplicate: true,
            matched_node_id: Some(matched.id),
            matched_title: Some(matched.title.clone()),
            confidence,
            reassigned_source_ids: candidate.source_unit_ids.clone(),
            reasoning,
        }
    }
}

/// Everything one deduplication branch produced.
#[derive(Debug, Clone)]
pub struct DedupeOutcome {
    pub verdict: DuplicateVerdict,
    /// Kept for relation derivation and commit, even when judging failed.
    pub embedding: Option<Vec<f32>>,
    pub neighbours: Vec<ScoredConcept>,
    pub warning: Option<String>,
}

/// Deduplicate `candidates` as one superstep.
///
/// `guidance` is the critique or reviewer feedback of a revision pass and
/// goes into every judgement prompt.
pub async fn detect_duplicates<L, E, G>(
    generation: &StructuredGateway<L>,
    similarity: &SimilarityGateway<'_, E, G>,
    candidates: &[&CandidateConcept],
    guidance: Option<&str>,
    config: &WorkflowConfig,
) -> Vec<DedupeOutcome>
where
    L: LlmClient,
    E: EmbedderClient,
    G: GraphDriver,
{
    info!(candidates = candidates.len(), "detecting duplicates");
    let keys: Vec<usize> = (0..candidates.len()).collect();
    let outcomes = run_superstep("dedupe", keys, config.max_concurrency, |i| {
        judge_candidate(generation, similarity, candidates[i], guidance, config)
    })
    .await;

    let outcomes: Vec<DedupeOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();
    let duplicates = outcomes.iter().filter(|o| o.verdict.is_duplicate).count();
    info!(duplicates, novel = outcomes.len() - duplicates, "deduplication finished");
    outcomes
}

/// One deduplication branch.
pub async fn judge_candidate<L, E, G>(
    generation: &StructuredGateway<L>,
    similarity: &SimilarityGateway<'_, E, G>,
    candidate: &CandidateConcept,
    guidance: Option<&str>,
    config: &WorkflowConfig,
) -> DedupeOutcome
where
    L: LlmClient,
    E: EmbedderClient,
    G: GraphDriver,
{
    let temp_id = candidate.temp_id.clone();
    let fallback = |embedding: Option<Vec<f32>>, neighbours: Vec<ScoredConcept>, reason: String| {
        warn!(candidate = %temp_id, %reason, "dedup branch failed; treating candidate as novel");
        DedupeOutcome {
            verdict: DuplicateVerdict::novel(temp_id.clone(), 0.0, format!("not judged: {reason}")),
            embedding,
            neighbours,
            warning: Some(format!("'{}': {reason}; treated as novel", candidate.title)),
        }
    };

    let embedding = match similarity.embed(&candidate.embedding_text()).await {
        Ok(e) => e,
        Err(e) => return fallback(None, Vec::new(), format!("embedding failed: {e}")),
    };

    let neighbours = match similarity
        .nearest(&embedding, config.dedup_top_k, config.dedup_similarity_floor)
        .await
    {
        Ok(n) => n,
        Err(e) => return fallback(Some(embedding), Vec::new(), format!("similarity lookup failed: {e}")),
    };

    if neighbours.is_empty() {
        debug!(candidate = %candidate.temp_id, "no neighbour above floor");
        return DedupeOutcome {
            verdict: DuplicateVerdict::novel(
                candidate.temp_id.clone(),
                1.0,
                "no existing concept above the similarity floor",
            ),
            embedding: Some(embedding),
            neighbours,
            warning: None,
        };
    }

    let judgement: DuplicateJudgement =
        match generation.request(&duplicate_request(candidate, &neighbours, guidance)).await {
            Ok(j) => j,
            Err(failure) => {
                return fallback(Some(embedding), neighbours, format!("duplicate judgement failed: {failure}"))
            }
        };

    let verdict = match resolve_judgement(candidate, &judgement, &neighbours, config) {
        Ok(v) => v,
        Err(reason) => return fallback(Some(embedding), neighbours, reason),
    };
    debug!(
        candidate = %candidate.temp_id,
        duplicate = verdict.is_duplicate,
        confidence = verdict.confidence,
        "candidate judged"
    );
    DedupeOutcome {
        verdict,
        embedding: Some(embedding),
        neighbours,
        warning: None,
    }
}

/// Combine a judgement with the confidence threshold.
///
/// The matched id must be one of the neighbours shown to the model; anything
/// else is malformed output.
fn resolve_judgement(
    candidate: &CandidateConcept,
    judgement: &DuplicateJudgement,
    neighbours: &[ScoredConcept],
    config: &WorkflowConfig,
) -> std::result::Result<DuplicateVerdict, String> {
    if !judgement.is_duplicate {
        return Ok(DuplicateVerdict::novel(
            candidate.temp_id.clone(),
            judgement.confidence,
            judgement.reasoning.clone(),
        ));
    }

    let raw_id = judgement.matched_node_id.as_deref().unwrap_or_default().trim();
    let matched = Uuid::parse_str(raw_id)
        .ok()
        .and_then(|id| neighbours.iter().find(|n| n.id == id))
        .ok_or_else(|| format!("malformed output: matched id '{raw_id}' is not a shown neighbour"))?;

    if judgement.confidence < config.duplicate_confidence_threshold {
        return Ok(DuplicateVerdict::novel(
            candidate.temp_id.clone(),
            1.0 - judgement.confidence,
            format!(
                "possible duplicate of '{}' below confidence threshold: {}",
                matched.title, judgement.reasoning
            ),
        ));
    }

    Ok(DuplicateVerdict::duplicate(
        candidate,
        matched,
        judgement.confidence,
        judgement.reasoning.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> CandidateConcept {
        CandidateConcept {
            temp_id: TempId::new(0, 1),
            title: "B".to_string(),
            body: "body".to_string(),
            rationale: String::new(),
            source_unit_ids: BTreeSet::from([SourceUnitId::from("q3")]),
        }
    }

    fn neighbour(id: Uuid) -> ScoredConcept {
        ScoredConcept {
            id,
            title: "X".to_string(),
            summary: String::new(),
            score: 0.95,
        }
    }

    fn judgement(is_duplicate: bool, matched: Option<Uuid>, confidence: f64) -> DuplicateJudgement {
        DuplicateJudgement {
            is_duplicate,
            matched_node_id: matched.map(|id| id.to_string()),
            confidence,
            reasoning: "same idea".to_string(),
        }
    }

    #[test]
    fn confident_duplicate_reassigns_evidence() {
        let x = Uuid::new_v4();
        let verdict = resolve_judgement(
            &candidate(),
            &judgement(true, Some(x), 0.9),
            &[neighbour(x)],
            &WorkflowConfig::default(),
        )
        .unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.matched_node_id, Some(x));
        assert_eq!(verdict.matched_title.as_deref(), Some("X"));
        assert_eq!(verdict.reassigned_source_ids, BTreeSet::from([SourceUnitId::from("q3")]));
    }

    #[test]
    fn low_confidence_duplicate_stays_novel() {
        let x = Uuid::new_v4();
        let verdict = resolve_judgement(
            &candidate(),
            &judgement(true, Some(x), 0.5),
            &[neighbour(x)],
            &WorkflowConfig::default(),
        )
        .unwrap();
        assert!(!verdict.is_duplicate);
        assert!(verdict.reassigned_source_ids.is_empty());
    }

    #[test]
    fn unknown_match_is_rejected() {
        let err = resolve_judgement(
            &candidate(),
            &judgement(true, Some(Uuid::new_v4()), 0.9),
            &[neighbour(Uuid::new_v4())],
            &WorkflowConfig::default(),
        );
        assert!(err.is_err());
    }
}
