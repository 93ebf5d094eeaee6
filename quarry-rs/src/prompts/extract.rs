//! Candidate extraction prompt.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::gateway::{GenerationRequest, OutputContract};
use crate::nodes::SourceUnit;

use super::{request, sources_json};

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are extracting atomic concepts from a batch of quotations.

## What is a concept

A concept is ONE named unit of meaning: an idea, principle, distinction or
practice that a quotation expresses or presupposes. It must be atomic: if a
title needs "and" to be accurate, it is two concepts.

## Rules

- Every concept cites the ids of the quotations that support it (source_ids).
- A quotation supports AT MOST ONE concept. Pick the concept it expresses most
  directly.
- Quotations that express no concept go in `unattributed`. Do not invent a
  concept just to place a quotation.
- Titles are short noun phrases in the language of the quotations.
- The body explains the concept in two to four sentences, without quoting.
- The rationale says why this is a distinct concept worth keeping.

## Output Format

Return JSON with:
- concepts: Array of {title, body, rationale, source_ids}
- unattributed: Array of quotation ids that support no concept"#;

/// One concept as returned by the model.
#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct ExtractedConcept {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1))]
    pub body: String,
    #[serde(default)]
    pub rationale: String,
    pub source_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct ExtractionOutput {
    #[validate(nested)]
    pub concepts: Vec<ExtractedConcept>,
    #[serde(default)]
    pub unattributed: Vec<String>,
}

impl OutputContract for ExtractionOutput {
    const SHAPE: &'static str = "concept_extraction";
}

pub fn extraction_request(sources: &[SourceUnit], hints: Option<&str>) -> GenerationRequest {
    request(
        EXTRACTION_SYSTEM_PROMPT,
        "Extract the concepts expressed by these quotations:",
        json!({
            "quotations": sources_json(sources),
            "steering_hints": hints,
        }),
    )
}
