//! Quality gate prompt.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::gateway::{GenerationRequest, OutputContract};
use crate::pipeline::assess::{AssessmentInput, Criterion};

use super::{candidate_json, request, sources_json};

pub const ASSESSMENT_SYSTEM_PROMPT: &str = r#"You are reviewing the output of a concept extraction run before a human sees it.

## Rubric

Judge the extraction against each criterion independently:

1. atomicity: every concept names exactly one idea
2. distinctness: no two novel concepts mean the same thing, and no novel
   concept restates an existing one it was compared against
3. evidence_coverage: every quotation that expresses a concept is attributed,
   and every attribution is justified by the quotation text
4. relation_accuracy: every relation kind and direction is correct
5. language_conformance: titles and bodies use the language and register of
   the quotations
6. edge_case_handling: ambiguous, ironic or fragmentary quotations are handled
   deliberately rather than forced into concepts

## Rules

- Report every criterion exactly once.
- A criterion fails only for concrete problems; list each problem in `issues`
  naming the concept or quotation involved.
- The summary states what must change, or that the extraction is acceptable.

## Output Format

Return JSON with:
- criteria: Array of {criterion, passed, issues}
- summary: string"#;

#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct CriterionVerdict {
    pub criterion: Criterion,
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema, Validate)]
pub struct AssessmentOutput {
    pub criteria: Vec<CriterionVerdict>,
    #[serde(default)]
    pub summary: String,
}

impl OutputContract for AssessmentOutput {
    const SHAPE: &'static str = "quality_assessment";

    fn check(&self) -> std::result::Result<(), String> {
        let seen: BTreeSet<Criterion> = self.criteria.iter().map(|c| c.criterion).collect();
        if seen.len() != self.criteria.len() {
            return Err("a criterion was reported more than once".to_string());
        }
        let missing: Vec<&str> = Criterion::ALL
            .iter()
            .filter(|c| !seen.contains(c))
            .map(|c| c.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing criteria: {}", missing.join(", ")));
        }
        Ok(())
    }
}

pub fn assessment_request(input: &AssessmentInput<'_>) -> GenerationRequest {
    let novel: Vec<serde_json::Value> = input.novel.iter().map(|c| candidate_json(c)).collect();
    let duplicates: Vec<serde_json::Value> = input
        .duplicates
        .iter()
        .map(|(candidate, verdict)| {
            json!({
                "candidate": candidate_json(candidate),
                "matched_node_id": verdict.matched_node_id,
                "matched_title": verdict.matched_title,
                "confidence": verdict.confidence,
            })
        })
        .collect();
    let relations: Vec<serde_json::Value> = input
        .relations
        .iter()
        .map(|r| {
            json!({
                "source": r.source.to_string(),
                "target": r.target.to_string(),
                "kind": r.kind,
                "explanation": r.explanation,
                "confidence": r.confidence,
            })
        })
        .collect();
    request(
        ASSESSMENT_SYSTEM_PROMPT,
        "Assess this extraction:",
        json!({
            "quotations": sources_json(input.sources),
            "novel_concepts": novel,
            "duplicates": duplicates,
            "relations": relations,
            "unattributed": input.unattributed,
        }),
    )
}
