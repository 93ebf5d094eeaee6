//! Refinement and feedback-incorporation prompts.
//!
//! Both passes return a complete revised
//! [`ExtractionOutput`](super::ExtractionOutput); the previous
//! candidate set is replaced, not patched.

use serde::Serialize;
use serde_json::json;

use crate::edges::RelationKind;
use crate::gateway::GenerationRequest;
use crate::nodes::{CandidateConcept, SourceUnit};

use super::{candidate_json, request, sources_json};

pub const REFINE_SYSTEM_PROMPT: &str = r#"You are revising a concept extraction that failed review.

## Rules

- Fix every issue in the critique. Keep concepts that were not criticised
  unchanged, including their titles.
- Every concept cites the quotation ids that support it; a quotation supports
  at most one concept.
- Quotations that express no concept go in `unattributed`.
- `previous_decisions` lists the duplicate matches and relations of the pass
  under review. They are re-derived after your revision with the critique in
  hand; adjust the concepts so those decisions can be corrected.
- Return the COMPLETE revised extraction, not only the changed concepts.

## Output Format

Return JSON with:
- concepts: Array of {title, body, rationale, source_ids}
- unattributed: Array of quotation ids that support no concept"#;

pub const FEEDBACK_SYSTEM_PROMPT: &str = r#"You are revising a concept extraction according to a human reviewer's feedback.

## Rules

- The reviewer's feedback takes precedence over every other rule and over any
  earlier automated critique.
- Change only what the feedback asks for, unless the change forces another.
- `previous_decisions` lists the duplicate matches and relations the reviewer
  saw. They are re-derived after your revision with the feedback in hand.
- Every concept cites the quotation ids that support it; a quotation supports
  at most one concept.
- Return the COMPLETE revised extraction, not only the changed concepts.

## Output Format

Return JSON with:
- concepts: Array of {title, body, rationale, source_ids}
- unattributed: Array of quotation ids that support no concept"#;

/// What the revision has to address.
#[derive(Debug, Clone, Copy)]
pub enum Revision<'a> {
    /// Issues raised by the quality gate.
    Critique { issues: &'a [String], summary: &'a str },
    /// Free text from the human reviewer, with the last critique as context.
    Feedback { text: &'a str, critique: &'a [String] },
}

impl Revision<'_> {
    /// Instructions carried into the deduplication and relation prompts of
    /// the pass that follows the revision.
    pub fn guidance(&self) -> String {
        match self {
            Revision::Critique { issues, summary } => {
                let mut text = format!("Quality critique of the previous pass: {summary}");
                for issue in issues.iter() {
                    text.push_str("\n- ");
                    text.push_str(issue);
                }
                text
            }
            Revision::Feedback { text, .. } => {
                format!("Reviewer feedback (overrides every other rule): {text}")
            }
        }
    }
}

/// A duplicate match of the pass being revised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorDuplicate {
    pub concept: String,
    pub matched: String,
    pub confidence: f64,
}

/// A relation of the pass being revised, labelled by title.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorRelation {
    pub source: String,
    pub kind: RelationKind,
    pub target: String,
    pub explanation: String,
}

/// Duplicate and relation decisions shown alongside the extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriorDecisions {
    pub duplicates: Vec<PriorDuplicate>,
    pub relations: Vec<PriorRelation>,
}

pub fn refine_request(
    sources: &[SourceUnit],
    candidates: &[CandidateConcept],
    unattributed: &[String],
    prior: &PriorDecisions,
    revision: Revision<'_>,
) -> GenerationRequest {
    let current: Vec<serde_json::Value> = candidates.iter().map(candidate_json).collect();
    let extraction = json!({ "concepts": current, "unattributed": unattributed });
    match revision {
        Revision::Critique { issues, summary } => request(
            REFINE_SYSTEM_PROMPT,
            "Revise this extraction to address the critique:",
            json!({
                "quotations": sources_json(sources),
                "extraction": extraction,
                "previous_decisions": prior,
                "critique": { "summary": summary, "issues": issues },
            }),
        ),
        Revision::Feedback { text, critique } => request(
            FEEDBACK_SYSTEM_PROMPT,
            "Revise this extraction according to the reviewer's feedback:",
            json!({
                "quotations": sources_json(sources),
                "extraction": extraction,
                "previous_decisions": prior,
                "reviewer_feedback": text,
                "earlier_critique": critique,
            }),
        ),
    }
}
