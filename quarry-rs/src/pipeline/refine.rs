//! Refinement stage: critique or reviewer feedback in, revised candidates out.

use tracing::info;

use crate::errors::GenerationFailure;
use crate::gateway::StructuredGateway;
use crate::llm_client::LlmClient;
use crate::nodes::{CandidateConcept, SourceUnit};
use crate::prompts::refine::{refine_request, PriorDecisions, Revision};
use crate::prompts::ExtractionOutput;

use super::extract::{normalize_extraction, ExtractionResult};

/// Produce a revised candidate set.
///
/// The result replaces the current candidates wholesale and is normalized
/// like a fresh extraction under the new `generation`.
pub async fn refine_candidates<L: LlmClient>(
    gateway: &StructuredGateway<L>,
    sources: &[SourceUnit],
    candidates: &[CandidateConcept],
    unattributed: &[String],
    prior: &PriorDecisions,
    revision: Revision<'_>,
    generation: u32,
) -> std::result::Result<ExtractionResult, GenerationFailure> {
    let kind = match revision {
        Revision::Critique { .. } => "critique",
        Revision::Feedback { .. } => "feedback",
    };
    info!(revision = kind, current = candidates.len(), generation, "refining candidates");
    let output: ExtractionOutput = gateway
        .request(&refine_request(sources, candidates, unattributed, prior, revision))
        .await?;
    let result = normalize_extraction(output, sources, generation);
    info!(candidates = result.candidates.len(), "refinement finished");
    Ok(result)
}
