//! Prompt templates and output contracts for each LLM-backed stage.
//!
//! Each submodule pairs a system prompt with the output type the model must
//! return and a builder for the [`GenerationRequest`] payload. Prompts are
//! string literals compiled into the crate.

pub mod assess;
pub mod dedupe;
pub mod extract;
pub mod refine;
pub mod relations;

use serde_json::json;

use crate::gateway::GenerationRequest;
use crate::nodes::{CandidateConcept, SourceUnit};

pub use assess::{AssessmentOutput, CriterionVerdict};
pub use dedupe::DuplicateJudgement;
pub use extract::{ExtractedConcept, ExtractionOutput};
pub use relations::{RelationSuggestions, SuggestedRelation};

/// Fragments rendered as the JSON array every prompt payload embeds.
pub(crate) fn sources_json(sources: &[SourceUnit]) -> serde_json::Value {
    sources
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "text": s.text,
                "attribution": s.attribution,
            })
        })
        .collect()
}

pub(crate) fn candidate_json(candidate: &CandidateConcept) -> serde_json::Value {
    json!({
        "id": candidate.temp_id,
        "title": candidate.title,
        "body": candidate.body,
        "rationale": candidate.rationale,
        "source_ids": candidate.source_unit_ids,
    })
}

pub(crate) fn request(instructions: &str, heading: &str, payload: serde_json::Value) -> GenerationRequest {
    let body = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
    GenerationRequest::new(instructions, format!("{heading}\n\n{body}"))
}
