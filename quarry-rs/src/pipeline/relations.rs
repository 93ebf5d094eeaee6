//! Relation derivation stage.
//!
//! For each novel concept the pool of possible targets is the other novel
//! concepts of the run plus committed concepts found by kind-targeted
//! similarity queries: every relation kind contributes at least two query
//! texts, so a concept that is a *part* of something is searched for
//! differently from one that *contradicts* something.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{GraphDriver, ScoredConcept};
use crate::edges::{RelationEndpoint, RelationKind, RelationProposal};
use crate::embedder::EmbedderClient;
use crate::gateway::{SimilarityGateway, StructuredGateway};
use crate::llm_client::LlmClient;
use crate::nodes::concept::short_summary;
use crate::nodes::{CandidateConcept, TempId};
use crate::prompts::relations::relation_request;
use crate::prompts::RelationSuggestions;
use crate::types::WorkflowConfig;
use crate::utils::excerpt;

use super::superstep::run_superstep;

/// What one relation branch produced.
#[derive(Debug, Clone, Default)]
pub struct RelationBranch {
    pub proposals: Vec<RelationProposal>,
    /// Committed concepts in the pool, for title resolution in reports.
    pub pool: Vec<ScoredConcept>,
    pub warnings: Vec<String>,
}

/// Derive relations for every concept in `scheduled` as one superstep.
///
/// `novel` is the full novel set of the run (the candidate half of every
/// pool). `guidance` is the critique or reviewer feedback of a revision pass.
pub async fn derive_relations<L, E, G>(
    generation: &StructuredGateway<L>,
    similarity: &SimilarityGateway<'_, E, G>,
    scheduled: &[&CandidateConcept],
    novel: &[&CandidateConcept],
    guidance: Option<&str>,
    config: &WorkflowConfig,
) -> Vec<(TempId, std::result::Result<RelationBranch, String>)>
where
    L: LlmClient,
    E: EmbedderClient,
    G: GraphDriver,
{
    info!(concepts = scheduled.len(), "deriving relations");
    let keys: Vec<usize> = (0..scheduled.len()).collect();
    let results = run_superstep("relations", keys, config.max_concurrency, |i| async move {
        let concept = scheduled[i];
        let others: Vec<&CandidateConcept> = novel
            .iter()
            .copied()
            .filter(|c| c.temp_id != concept.temp_id)
            .collect();
        let outcome = derive_for_concept(generation, similarity, concept, &others, guidance, config).await;
        (concept.temp_id.clone(), outcome)
    })
    .await;

    let results: Vec<_> = results.into_iter().map(|(_, r)| r).collect();
    let proposed: usize = results
        .iter()
        .filter_map(|(_, r)| r.as_ref().ok())
        .map(|b| b.proposals.len())
        .sum();
    info!(proposed, "relation derivation finished");
    results
}

/// One relation branch. Errors are returned as a reason string for the
/// caller to fold into warnings.
pub async fn derive_for_concept<L, E, G>(
    generation: &StructuredGateway<L>,
    similarity: &SimilarityGateway<'_, E, G>,
    concept: &CandidateConcept,
    others: &[&CandidateConcept],
    guidance: Option<&str>,
    config: &WorkflowConfig,
) -> std::result::Result<RelationBranch, String>
where
    L: LlmClient,
    E: EmbedderClient,
    G: GraphDriver,
{
    let pool = existing_pool(similarity, concept, config).await?;

    if pool.is_empty() && others.is_empty() {
        debug!(candidate = %concept.temp_id, "empty relation pool");
        return Ok(RelationBranch::default());
    }

    let suggestions: RelationSuggestions = generation
        .request(&relation_request(concept, others, &pool, guidance))
        .await
        .map_err(|f| format!("relation suggestions for '{}' failed: {f}", concept.title))?;

    let mut branch = RelationBranch {
        pool,
        ..RelationBranch::default()
    };
    let source = RelationEndpoint::candidate(concept.temp_id.clone());
    let mut proposals = Vec::new();

    for suggestion in suggestions.relations {
        let Some(target) = resolve_target(&suggestion.target_id, others, &branch.pool) else {
            branch.warnings.push(format!(
                "'{}': dropped {} relation to unknown target '{}'",
                concept.title, suggestion.kind, suggestion.target_id
            ));
            continue;
        };
        if suggestion.confidence < config.min_relation_confidence {
            debug!(
                candidate = %concept.temp_id,
                kind = %suggestion.kind,
                confidence = suggestion.confidence,
                "relation below confidence floor"
            );
            continue;
        }
        match RelationProposal::new(
            source.clone(),
            target,
            suggestion.kind,
            suggestion.explanation,
            suggestion.confidence,
        ) {
            Ok(p) => proposals.push(p),
            Err(e) => branch.warnings.push(format!("'{}': {e}", concept.title)),
        }
    }

    merge_proposals(&mut branch.proposals, proposals);
    Ok(branch)
}

/// Committed concepts reachable through kind-targeted queries, best score
/// per node, sorted descending.
async fn existing_pool<E, G>(
    similarity: &SimilarityGateway<'_, E, G>,
    concept: &CandidateConcept,
    config: &WorkflowConfig,
) -> std::result::Result<Vec<ScoredConcept>, String>
where
    E: EmbedderClient,
    G: GraphDriver,
{
    let queries = kind_queries(concept, config.relation_queries_per_kind);
    let texts: Vec<&str> = queries.iter().map(|(_, q)| q.as_str()).collect();
    let embeddings = similarity
        .embed_many(&texts)
        .await
        .map_err(|e| format!("embedding relation queries for '{}' failed: {e}", concept.title))?;

    let mut best: BTreeMap<Uuid, ScoredConcept> = BTreeMap::new();
    for ((kind, _), embedding) in queries.iter().zip(embeddings.iter()) {
        let hits = similarity
            .nearest(embedding, config.relation_top_k, config.relation_similarity_floor)
            .await
            .map_err(|e| format!("{kind} query for '{}' failed: {e}", concept.title))?;
        for hit in hits {
            match best.get(&hit.id) {
                Some(prev) if prev.score >= hit.score => {}
                _ => {
                    best.insert(hit.id, hit);
                }
            }
        }
    }

    let mut pool: Vec<ScoredConcept> = best.into_values().collect();
    pool.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(pool)
}

/// At least `per_kind` distinct query texts for every relation kind.
pub fn kind_queries(concept: &CandidateConcept, per_kind: usize) -> Vec<(RelationKind, String)> {
    let lead = short_summary(&concept.body);
    let body = excerpt(&concept.body, 400);
    let mut queries = Vec::new();
    for kind in RelationKind::ALL {
        let phrase = kind.query_phrase();
        let templates = [
            format!("{}: {phrase}", concept.title),
            format!("{phrase}: {lead}"),
            format!("{phrase}: {}", concept.rationale),
            format!("{}. {body} ({phrase})", concept.title),
        ];
        let mut seen = BTreeSet::new();
        let mut n = 0usize;
        while seen.len() < per_kind.max(2) {
            let base = &templates[n % templates.len()];
            let text = if n < templates.len() {
                base.clone()
            } else {
                format!("{base} [{n}]")
            };
            if seen.insert(text.clone()) {
                queries.push((kind, text));
            }
            n += 1;
        }
    }
    queries
}

fn resolve_target(
    raw: &str,
    others: &[&CandidateConcept],
    pool: &[ScoredConcept],
) -> Option<RelationEndpoint> {
    let raw = raw.trim();
    if let Some(candidate) = others.iter().find(|c| c.temp_id.as_str() == raw) {
        return Some(RelationEndpoint::candidate(candidate.temp_id.clone()));
    }
    let id = Uuid::parse_str(raw).ok()?;
    pool.iter()
        .any(|n| n.id == id)
        .then(|| RelationEndpoint::existing(id))
}

/// Append `incoming` to `existing`, merging identical
/// `(source, target, kind)` proposals and keeping the most confident one.
pub fn merge_proposals(existing: &mut Vec<RelationProposal>, incoming: Vec<RelationProposal>) {
    for proposal in incoming {
        match existing.iter_mut().find(|p| p.key() == proposal.key()) {
            Some(current) if current.confidence >= proposal.confidence => {}
            Some(current) => *current = proposal,
            None => existing.push(proposal),
        }
    }
}

/// Log and collect the reasons of failed branches.
pub fn fold_failures(results: &[(TempId, std::result::Result<RelationBranch, String>)]) -> Vec<(TempId, String)> {
    results
        .iter()
        .filter_map(|(id, r)| r.as_ref().err().map(|e| (id.clone(), e.clone())))
        .inspect(|(id, reason)| warn!(candidate = %id, %reason, "relation branch failed"))
        .collect()
}
