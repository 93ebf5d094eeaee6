//! Review report handed to the human reviewer at the suspension point.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::edges::{RelationEndpoint, RelationKind};
use crate::nodes::concept::short_summary;
use crate::nodes::{SourceUnitId, TempId};
use crate::prompts::refine::{PriorDecisions, PriorDuplicate, PriorRelation};

use super::state::{CritiqueRecord, Phase, WorkflowNote, WorkflowState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConcept {
    pub temp_id: TempId,
    pub title: String,
    pub short_summary: String,
    pub body: String,
    pub source_ids: Vec<SourceUnitId>,
}

/// A candidate merged into an existing node and the evidence it hands over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDuplicate {
    pub temp_id: TempId,
    pub title: String,
    pub matched_node_id: Option<Uuid>,
    pub matched_title: Option<String>,
    pub confidence: f64,
    pub reassigned_source_ids: Vec<SourceUnitId>,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRelation {
    pub source: String,
    pub target: String,
    pub kind: RelationKind,
    /// Label of the edge written in the opposite direction.
    pub reciprocal: RelationKind,
    pub explanation: String,
    pub confidence: f64,
}

/// Everything a reviewer needs to approve or send feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub run_id: Uuid,
    pub batch_id: String,
    pub phase: Phase,
    pub refinement_iterations: u32,
    pub review_iterations: u32,
    pub novel: Vec<ReportConcept>,
    pub duplicates: Vec<ReportDuplicate>,
    pub relations: Vec<ReportRelation>,
    pub unattributed: Vec<SourceUnitId>,
    /// Whether the last quality-gate verdict passed; `None` when the gate
    /// never ran.
    pub assessment_passed: Option<bool>,
    pub outstanding_issues: Vec<String>,
    pub critiques: Vec<CritiqueRecord>,
    pub feedback_history: Vec<String>,
    pub warnings: Vec<WorkflowNote>,
    pub errors: Vec<WorkflowNote>,
}

impl ReviewReport {
    /// The duplicate and relation decisions in the form a revision prompt
    /// shows them.
    pub fn prior_decisions(&self) -> PriorDecisions {
        PriorDecisions {
            duplicates: self
                .duplicates
                .iter()
                .map(|d| PriorDuplicate {
                    concept: d.title.clone(),
                    matched: d
                        .matched_title
                        .clone()
                        .or_else(|| d.matched_node_id.map(|id| id.to_string()))
                        .unwrap_or_default(),
                    confidence: d.confidence,
                })
                .collect(),
            relations: self
                .relations
                .iter()
                .map(|r| PriorRelation {
                    source: r.source.clone(),
                    kind: r.kind,
                    target: r.target.clone(),
                    explanation: r.explanation.clone(),
                })
                .collect(),
        }
    }

    pub fn from_state(state: &WorkflowState) -> Self {
        let novel = state
            .novel_candidates()
            .into_iter()
            .map(|c| ReportConcept {
                temp_id: c.temp_id.clone(),
                title: c.title.clone(),
                short_summary: short_summary(&c.body),
                body: c.body.clone(),
                source_ids: c.source_unit_ids.iter().cloned().collect(),
            })
            .collect();

        let duplicates = state
            .duplicate_candidates()
            .into_iter()
            .map(|(c, v)| ReportDuplicate {
                temp_id: c.temp_id.clone(),
                title: c.title.clone(),
                matched_node_id: v.matched_node_id,
                matched_title: v.matched_title.clone(),
                confidence: v.confidence,
                reassigned_source_ids: v.reassigned_source_ids.iter().cloned().collect(),
                reasoning: v.reasoning.clone(),
            })
            .collect();

        let label = |endpoint: &RelationEndpoint| -> String {
            match endpoint {
                RelationEndpoint::Candidate { temp_id } => state
                    .candidate(temp_id)
                    .map(|c| c.title.clone())
                    .unwrap_or_else(|| temp_id.to_string()),
                RelationEndpoint::Existing { node_id } => state
                    .known_titles
                    .get(node_id)
                    .cloned()
                    .unwrap_or_else(|| node_id.to_string()),
            }
        };
        let relations = state
            .relations
            .iter()
            .map(|r| ReportRelation {
                source: label(&r.source),
                target: label(&r.target),
                kind: r.kind,
                reciprocal: r.kind.reciprocal(),
                explanation: r.explanation.clone(),
                confidence: r.confidence,
            })
            .collect();

        Self {
            run_id: state.run_id,
            batch_id: state.batch_id.clone(),
            phase: state.phase,
            refinement_iterations: state.refinement_iterations,
            review_iterations: state.review_iterations,
            novel,
            duplicates,
            relations,
            unattributed: state.unattributed.iter().cloned().collect(),
            assessment_passed: state.assessment.as_ref().map(|a| a.passed),
            outstanding_issues: state.assessment.as_ref().map(|a| a.issues()).unwrap_or_default(),
            critiques: state.critiques.clone(),
            feedback_history: state.feedback_history.clone(),
            warnings: state.warnings.clone(),
            errors: state.errors.clone(),
        }
    }

    /// Render the report as markdown for a terminal or a review UI.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Review: batch {}", self.batch_id);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Run `{}` ({}), {} refinement pass(es), {} feedback pass(es).",
            self.run_id, self.phase, self.refinement_iterations, self.review_iterations
        );
        match self.assessment_passed {
            Some(true) => out.push_str("Quality gate: **passed**\n"),
            Some(false) => out.push_str("Quality gate: **failed**\n"),
            None => out.push_str("Quality gate: not evaluated\n"),
        }

        let _ = writeln!(out, "\n## New concepts ({})\n", self.novel.len());
        for c in &self.novel {
            let ids: Vec<&str> = c.source_ids.iter().map(SourceUnitId::as_str).collect();
            let _ = writeln!(out, "### {}\n\n{}\n\nEvidence: {}\n", c.title, c.body, ids.join(", "));
        }

        if !self.duplicates.is_empty() {
            let _ = writeln!(out, "## Merged into existing concepts ({})\n", self.duplicates.len());
            for d in &self.duplicates {
                let target = d.matched_title.as_deref().unwrap_or("unknown concept");
                let ids: Vec<&str> = d.reassigned_source_ids.iter().map(SourceUnitId::as_str).collect();
                let _ = writeln!(
                    out,
                    "- **{}** → {} (confidence {:.2}); evidence moved: {}",
                    d.title,
                    target,
                    d.confidence,
                    ids.join(", ")
                );
            }
            out.push('\n');
        }

        if !self.relations.is_empty() {
            let _ = writeln!(out, "## Relations ({})\n", self.relations.len());
            for r in &self.relations {
                let _ = writeln!(
                    out,
                    "- {} **{}** {} (reverse: {}, confidence {:.2}): {}",
                    r.source, r.kind, r.target, r.reciprocal, r.confidence, r.explanation
                );
            }
            out.push('\n');
        }

        if !self.unattributed.is_empty() {
            let ids: Vec<&str> = self.unattributed.iter().map(SourceUnitId::as_str).collect();
            let _ = writeln!(out, "## Unattributed fragments\n\n{}\n", ids.join(", "));
        }

        section(&mut out, "Outstanding issues", self.outstanding_issues.iter());
        section(&mut out, "Reviewer feedback so far", self.feedback_history.iter());
        section(&mut out, "Warnings", self.warnings.iter());
        section(&mut out, "Errors", self.errors.iter());
        out
    }
}

fn section<T: std::fmt::Display>(out: &mut String, heading: &str, items: impl ExactSizeIterator<Item = T>) {
    if items.len() == 0 {
        return;
    }
    let _ = writeln!(out, "## {heading}\n");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
    out.push('\n');
}
