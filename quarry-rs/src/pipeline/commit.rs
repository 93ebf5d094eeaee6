//! Commit stage.
//!
//! Commit runs in strict order: create novel nodes, write both directions of
//! every edge, write evidence links, then mirror each new node. The plan is
//! a pure function of the workflow state: node ids derive from the run id
//! and the candidate temp id, so a retried step writes exactly the same
//! records and idempotent driver writes turn retries into no-ops.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::GraphDriver;
use crate::edges::{ConceptEdge, EvidenceLink, RelationEndpoint};
use crate::errors::Result;
use crate::mirror::{ConceptMirror, MirrorLink, MirrorWriter, TitleResolver};
use crate::nodes::{ConceptNode, SourceUnit, TempId};
use crate::workflow::WorkflowState;

/// Durable id of the node a candidate becomes.
pub fn durable_node_id(run_id: Uuid, temp_id: &TempId) -> Uuid {
    Uuid::new_v5(&run_id, temp_id.as_str().as_bytes())
}

/// Everything the commit phase writes.
#[derive(Debug, Clone, Default)]
pub struct CommitPlan {
    pub nodes: Vec<(TempId, ConceptNode)>,
    /// Both directions of every relation, deduplicated by key.
    pub edges: Vec<ConceptEdge>,
    pub evidence: Vec<EvidenceLink>,
    /// Proposals or fragments the plan had to skip.
    pub skipped: Vec<String>,
}

/// Counts reported once a run is committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub node_ids: BTreeMap<TempId, Uuid>,
    pub nodes_created: usize,
    pub edges_written: usize,
    pub evidence_links: usize,
    pub duplicates_merged: usize,
    pub mirror_pending: Vec<Uuid>,
}

/// Build the commit plan from a reviewed state.
pub fn plan_commit(state: &WorkflowState, created_at: DateTime<Utc>) -> CommitPlan {
    let mut plan = CommitPlan::default();
    let mut ids: BTreeMap<&TempId, Uuid> = BTreeMap::new();

    for candidate in state.novel_candidates() {
        let id = durable_node_id(state.run_id, &candidate.temp_id);
        ids.insert(&candidate.temp_id, id);
        let embedding = state
            .embeddings
            .get(&candidate.temp_id)
            .cloned()
            .unwrap_or_default();
        plan.nodes.push((
            candidate.temp_id.clone(),
            ConceptNode::from_candidate(id, candidate, embedding, state.run_id, created_at),
        ));
    }

    let resolve = |endpoint: &RelationEndpoint| -> Option<Uuid> {
        match endpoint {
            RelationEndpoint::Candidate { temp_id } => ids.get(temp_id).copied(),
            RelationEndpoint::Existing { node_id } => Some(*node_id),
        }
    };

    let mut edge_keys = BTreeSet::new();
    for proposal in &state.relations {
        let (Some(source), Some(target)) = (resolve(&proposal.source), resolve(&proposal.target)) else {
            plan.skipped.push(format!(
                "{} -[{}]-> {}: endpoint is not a novel concept",
                proposal.source, proposal.kind, proposal.target
            ));
            continue;
        };
        match ConceptEdge::bidirectional(source, target, proposal.kind, &proposal.explanation, proposal.confidence) {
            Ok(pair) => {
                for edge in pair {
                    if edge_keys.insert(edge.key()) {
                        plan.edges.push(edge);
                    }
                }
            }
            Err(e) => plan.skipped.push(e.to_string()),
        }
    }

    let mut links = BTreeSet::new();
    for candidate in &state.candidates {
        let target = match state.verdicts.get(&candidate.temp_id) {
            Some(v) if v.is_duplicate => v.matched_node_id,
            _ => ids.get(&candidate.temp_id).copied(),
        };
        let Some(concept_id) = target else {
            plan.skipped.push(format!("'{}': no concept to attach evidence to", candidate.title));
            continue;
        };
        let fragments = match state.verdicts.get(&candidate.temp_id) {
            Some(v) if v.is_duplicate => &v.reassigned_source_ids,
            _ => &candidate.source_unit_ids,
        };
        for source_id in fragments {
            links.insert(EvidenceLink::new(source_id.clone(), concept_id));
        }
    }
    plan.evidence = links.into_iter().collect();

    plan
}

pub async fn write_nodes<G: GraphDriver>(driver: &G, plan: &CommitPlan) -> Result<usize> {
    for (temp_id, node) in &plan.nodes {
        debug!(candidate = %temp_id, node = %node.id, "creating concept");
        driver.create_concept(node).await?;
    }
    Ok(plan.nodes.len())
}

/// Write every planned edge whose endpoints exist.
///
/// Existing endpoints are checked first; edges to nodes that vanished since
/// review are skipped and reported instead of failing the step.
pub async fn write_relations<G: GraphDriver>(
    driver: &G,
    plan: &CommitPlan,
) -> Result<(usize, Vec<String>)> {
    let planned: BTreeSet<Uuid> = plan.nodes.iter().map(|(_, n)| n.id).collect();
    let mut external: BTreeSet<Uuid> = BTreeSet::new();
    for edge in &plan.edges {
        for id in [edge.source_id, edge.target_id] {
            if !planned.contains(&id) {
                external.insert(id);
            }
        }
    }

    let mut missing = BTreeSet::new();
    for id in external {
        if driver.get_concept(id).await?.is_none() {
            missing.insert(id);
        }
    }

    let mut written = 0;
    let mut skipped = Vec::new();
    for edge in &plan.edges {
        if missing.contains(&edge.source_id) || missing.contains(&edge.target_id) {
            skipped.push(format!(
                "{} -[{}]-> {}: endpoint no longer exists",
                edge.source_id, edge.kind, edge.target_id
            ));
            continue;
        }
        driver.create_relation(edge).await?;
        written += 1;
    }
    Ok((written, skipped))
}

pub async fn write_evidence<G: GraphDriver>(
    driver: &G,
    plan: &CommitPlan,
    sources: &[SourceUnit],
) -> Result<usize> {
    let by_id: BTreeMap<_, _> = sources.iter().map(|s| (&s.id, s)).collect();
    let mut written = 0;
    for link in &plan.evidence {
        let Some(source) = by_id.get(&link.source_unit_id) else {
            warn!(fragment = %link.source_unit_id, "evidence for a fragment outside the batch");
            continue;
        };
        driver.create_evidence(source, link).await?;
        written += 1;
    }
    Ok(written)
}

/// Outcome of the mirror step.
#[derive(Debug, Clone, Default)]
pub struct MirrorOutcome {
    pub mirrored: BTreeSet<Uuid>,
    pub pending: BTreeSet<Uuid>,
    pub failures: Vec<String>,
}

/// Mirror every planned node not yet mirrored. Failures never abort: the
/// node lands in `pending` with the reason in `failures`.
pub async fn mirror_nodes<M: MirrorWriter>(
    mirror: &M,
    plan: &CommitPlan,
    titles: &TitleResolver,
    sources: &[SourceUnit],
    already: &BTreeSet<Uuid>,
) -> MirrorOutcome {
    let mut outcome = MirrorOutcome::default();
    let by_id: BTreeMap<_, _> = sources.iter().map(|s| (&s.id, s)).collect();

    for (_, node) in &plan.nodes {
        if already.contains(&node.id) {
            continue;
        }
        let outgoing: Vec<MirrorLink> = plan
            .edges
            .iter()
            .filter(|e| e.source_id == node.id)
            .map(|e| MirrorLink {
                kind: e.kind,
                node_id: e.target_id,
            })
            .collect();
        let incoming: Vec<MirrorLink> = plan
            .edges
            .iter()
            .filter(|e| e.target_id == node.id)
            .map(|e| MirrorLink {
                kind: e.kind,
                node_id: e.source_id,
            })
            .collect();
        let evidence: Vec<&SourceUnit> = plan
            .evidence
            .iter()
            .filter(|l| l.concept_id == node.id)
            .filter_map(|l| by_id.get(&l.source_unit_id).copied())
            .collect();

        let view = ConceptMirror {
            node,
            outgoing,
            incoming,
            evidence,
            titles,
        };
        match mirror.write_concept(&view).await {
            Ok(receipt) => {
                debug!(node = %node.id, location = %receipt.location, "concept mirrored");
                outcome.mirrored.insert(node.id);
            }
            Err(e) => {
                warn!(node = %node.id, error = %e, "mirror write failed; flagged mirror_pending");
                outcome.pending.insert(node.id);
                outcome.failures.push(e.to_string());
            }
        }
    }

    info!(
        mirrored = outcome.mirrored.len(),
        pending = outcome.pending.len(),
        "mirror step finished"
    );
    outcome
}
