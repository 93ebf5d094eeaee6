//! Relation derivation prompt.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::driver::ScoredConcept;
use crate::edges::RelationKind;
use crate::gateway::{GenerationRequest, OutputContract};
use crate::nodes::CandidateConcept;

use super::{candidate_json, request};

pub const RELATION_SYSTEM_PROMPT: &str = r#"You are linking a concept to related concepts in a knowledge graph.

## Relation kinds

- PART_OF: the concept is a component of the target
- HAS_PART: the target is a component of the concept
- GENERALIZES: the concept is a more general form of the target
- SPECIALIZES: the concept is a more specific case of the target
- ENABLES: the concept makes the target possible
- ENABLED_BY: the target makes the concept possible
- SIMILAR_TO: both express closely resembling ideas
- CONTRADICTS: the ideas cannot both hold
- COMPLEMENTS: the ideas complete or balance each other

## Rules

- Relations are optional. Return an empty list when nothing clearly applies.
- Only use target ids from `candidates` or `existing`. Never relate the concept
  to itself.
- State each relation once, from the concept to the target. The reverse
  direction is derived automatically.
- Explain every relation in one sentence and give a confidence between 0 and 1.
- When the payload carries `guidance`, it is the critique or the human
  reviewer's feedback on the previous pass. Follow it; reviewer feedback
  overrides every rule above.

## Output Format

Return JSON with:
- relations: Array of {target_id, kind, explanation, confidence}"#;

#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct SuggestedRelation {
    #[validate(length(min = 1))]
    pub target_id: String,
    pub kind: RelationKind,
    #[serde(default)]
    pub explanation: String,
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct RelationSuggestions {
    #[validate(nested)]
    pub relations: Vec<SuggestedRelation>,
}

impl OutputContract for RelationSuggestions {
    const SHAPE: &'static str = "relation_suggestions";
}

pub fn relation_request(
    concept: &CandidateConcept,
    candidates: &[&CandidateConcept],
    existing: &[ScoredConcept],
    guidance: Option<&str>,
) -> GenerationRequest {
    let candidates: Vec<serde_json::Value> = candidates
        .iter()
        .map(|c| json!({ "id": c.temp_id, "title": c.title, "body": c.body }))
        .collect();
    let existing: Vec<serde_json::Value> = existing
        .iter()
        .map(|n| json!({ "id": n.id, "title": n.title, "summary": n.summary }))
        .collect();
    let mut payload = json!({
        "concept": candidate_json(concept),
        "candidates": candidates,
        "existing": existing,
    });
    if let Some(guidance) = guidance {
        payload["guidance"] = json!(guidance);
    }
    request(
        RELATION_SYSTEM_PROMPT,
        "Propose relations from this concept:",
        payload,
    )
}
