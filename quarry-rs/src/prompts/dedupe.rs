//! Duplicate judgement prompt.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::driver::ScoredConcept;
use crate::gateway::{GenerationRequest, OutputContract};
use crate::nodes::CandidateConcept;

use super::{candidate_json, request};

pub const DEDUP_SYSTEM_PROMPT: &str = r#"You are deciding whether a newly extracted concept already exists in a knowledge graph.

## Core Principle: same meaning, not same words

The candidate is a DUPLICATE of an existing concept only if both name the SAME
idea at the SAME level of generality. Wording, language and emphasis may differ.

## Key Rules

- A broader or narrower idea is NOT a duplicate (it is a relation).
- An opposing idea is NOT a duplicate.
- When several existing concepts qualify, pick the closest one.
- Only ids from the `existing` list may be returned as matched_node_id.
- When the payload carries `guidance`, it is the critique or the human
  reviewer's feedback on the previous pass. Follow it; reviewer feedback
  overrides every rule above.

## Output Format

Return JSON with:
- is_duplicate: boolean
- matched_node_id: id of the matched existing concept, or null
- confidence: number between 0 and 1
- reasoning: one or two sentences"#;

#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct DuplicateJudgement {
    pub is_duplicate: bool,
    #[serde(default)]
    pub matched_node_id: Option<String>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl OutputContract for DuplicateJudgement {
    const SHAPE: &'static str = "duplicate_judgement";

    fn check(&self) -> std::result::Result<(), String> {
        if self.is_duplicate && self.matched_node_id.as_deref().map_or(true, str::is_empty) {
            return Err("duplicate judgement without matched_node_id".to_string());
        }
        Ok(())
    }
}

pub fn duplicate_request(
    candidate: &CandidateConcept,
    neighbours: &[ScoredConcept],
    guidance: Option<&str>,
) -> GenerationRequest {
    let existing: Vec<serde_json::Value> = neighbours
        .iter()
        .map(|n| {
            json!({
                "id": n.id,
                "title": n.title,
                "summary": n.summary,
                "similarity": n.score,
            })
        })
        .collect();
    let mut payload = json!({
        "candidate": candidate_json(candidate),
        "existing": existing,
    });
    if let Some(guidance) = guidance {
        payload["guidance"] = json!(guidance);
    }
    request(
        DEDUP_SYSTEM_PROMPT,
        "Is this candidate a duplicate of one of the existing concepts?",
        payload,
    )
}
