//! Candidate extraction stage.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::GenerationFailure;
use crate::gateway::StructuredGateway;
use crate::llm_client::LlmClient;
use crate::nodes::{CandidateConcept, SourceUnit, SourceUnitId, TempId};
use crate::prompts::extract::extraction_request;
use crate::prompts::ExtractionOutput;
use crate::utils::normalize_whitespace;

/// Normalized output of an extraction or refinement pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub candidates: Vec<CandidateConcept>,
    /// Batch fragments no candidate cites.
    pub unattributed: BTreeSet<SourceUnitId>,
    /// Corrections applied while normalizing the model output.
    pub warnings: Vec<String>,
}

/// Run the extraction prompt over the whole batch.
///
/// A failed generation is returned as-is; the caller records it as a stage
/// error and nothing is kept from the attempt.
pub async fn extract_candidates<L: LlmClient>(
    gateway: &StructuredGateway<L>,
    sources: &[SourceUnit],
    hints: Option<&str>,
    generation: u32,
) -> std::result::Result<ExtractionResult, GenerationFailure> {
    info!(fragments = sources.len(), generation, "extracting candidates");
    let output: ExtractionOutput = gateway.request(&extraction_request(sources, hints)).await?;
    let result = normalize_extraction(output, sources, generation);
    info!(
        candidates = result.candidates.len(),
        unattributed = result.unattributed.len(),
        "extraction finished"
    );
    Ok(result)
}

/// Turn raw model output into run-scoped candidates.
///
/// - titles and bodies are whitespace-normalized;
/// - concepts with an empty title are dropped;
/// - fragment ids outside the batch are dropped;
/// - a fragment claimed by two concepts stays with the first;
/// - concepts left without any fragment are dropped;
/// - every batch fragment no kept concept cites is unattributed.
pub fn normalize_extraction(
    output: ExtractionOutput,
    sources: &[SourceUnit],
    generation: u32,
) -> ExtractionResult {
    let batch: BTreeSet<&str> = sources.iter().map(|s| s.id.as_str()).collect();
    let mut claimed: BTreeMap<SourceUnitId, String> = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut candidates = Vec::new();

    for concept in output.concepts {
        let title = normalize_whitespace(&concept.title);
        if title.is_empty() {
            warnings.push("dropped a concept with an empty title".to_string());
            continue;
        }

        let mut source_unit_ids = BTreeSet::new();
        for raw_id in concept.source_ids {
            let id = SourceUnitId::from(raw_id.trim());
            if !batch.contains(id.as_str()) {
                warnings.push(format!("'{title}' cites unknown fragment '{id}'"));
                continue;
            }
            match claimed.get(&id) {
                Some(owner) if *owner != title => {
                    warnings.push(format!(
                        "fragment '{id}' is claimed by '{owner}' and '{title}'; kept with '{owner}'"
                    ));
                }
                Some(_) => {}
                None => {
                    claimed.insert(id.clone(), title.clone());
                    source_unit_ids.insert(id);
                }
            }
        }

        if source_unit_ids.is_empty() {
            warnings.push(format!("dropped '{title}': no supporting fragment left"));
            continue;
        }

        candidates.push(CandidateConcept {
            temp_id: TempId::new(generation, candidates.len()),
            title,
            body: normalize_whitespace(&concept.body),
            rationale: normalize_whitespace(&concept.rationale),
            source_unit_ids,
        });
    }

    let unattributed = sources
        .iter()
        .filter(|s| !claimed.contains_key(&s.id))
        .map(|s| s.id.clone())
        .collect();

    ExtractionResult {
        candidates,
        unattributed,
        warnings,
    }
}
