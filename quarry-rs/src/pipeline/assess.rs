//! Quality gate.
//!
//! Evaluates the accumulated extraction against a fixed six-criterion rubric.
//! Deterministic pre-checks run first and are merged into the model's
//! verdict: a criterion fails if either side finds an issue. The gate never
//! mutates extraction state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::edges::{RelationEndpoint, RelationProposal};
use crate::errors::GenerationFailure;
use crate::gateway::StructuredGateway;
use crate::llm_client::LlmClient;
use crate::nodes::{CandidateConcept, SourceUnit, SourceUnitId};
use crate::prompts::assess::assessment_request;
use crate::prompts::AssessmentOutput;

use super::dedupe::DuplicateVerdict;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Atomicity,
    Distinctness,
    EvidenceCoverage,
    RelationAccuracy,
    LanguageConformance,
    EdgeCaseHandling,
}

impl Criterion {
    pub const ALL: [Criterion; 6] = [
        Criterion::Atomicity,
        Criterion::Distinctness,
        Criterion::EvidenceCoverage,
        Criterion::RelationAccuracy,
        Criterion::LanguageConformance,
        Criterion::EdgeCaseHandling,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Criterion::Atomicity => "atomicity",
            Criterion::Distinctness => "distinctness",
            Criterion::EvidenceCoverage => "evidence_coverage",
            Criterion::RelationAccuracy => "relation_accuracy",
            Criterion::LanguageConformance => "language_conformance",
            Criterion::EdgeCaseHandling => "edge_case_handling",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion: Criterion,
    pub passed: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// One entry per criterion, in [`Criterion::ALL`] order.
    pub criteria: Vec<CriterionResult>,
    pub passed: bool,
    pub summary: String,
}

impl QualityAssessment {
    /// Issues of every failing criterion, prefixed with the criterion name.
    pub fn issues(&self) -> Vec<String> {
        self.criteria
            .iter()
            .filter(|c| !c.passed)
            .flat_map(|c| {
                let name = c.criterion;
                let mut issues: Vec<String> = c.issues.iter().map(|i| format!("{name}: {i}")).collect();
                if issues.is_empty() {
                    issues.push(format!("{name}: failed"));
                }
                issues
            })
            .collect()
    }

    pub fn failed_criteria(&self) -> Vec<Criterion> {
        self.criteria.iter().filter(|c| !c.passed).map(|c| c.criterion).collect()
    }
}

/// Read-only view of the extraction the gate evaluates.
#[derive(Debug, Clone)]
pub struct AssessmentInput<'a> {
    pub sources: &'a [SourceUnit],
    pub novel: Vec<&'a CandidateConcept>,
    pub duplicates: Vec<(&'a CandidateConcept, &'a DuplicateVerdict)>,
    pub relations: &'a [RelationProposal],
    pub unattributed: &'a BTreeSet<SourceUnitId>,
}

/// Run the quality gate.
pub async fn assess_extraction<L: LlmClient>(
    gateway: &StructuredGateway<L>,
    input: &AssessmentInput<'_>,
) -> std::result::Result<QualityAssessment, GenerationFailure> {
    let prechecks = precheck(input);
    let output: AssessmentOutput = gateway.request(&assessment_request(input)).await?;
    let assessment = merge_assessment(output, prechecks);
    info!(
        passed = assessment.passed,
        failed = ?assessment.failed_criteria(),
        "quality gate evaluated"
    );
    Ok(assessment)
}

/// Deterministic rubric checks that need no model.
pub fn precheck(input: &AssessmentInput<'_>) -> BTreeMap<Criterion, Vec<String>> {
    let mut issues: BTreeMap<Criterion, Vec<String>> = BTreeMap::new();

    for id in input.unattributed {
        issues
            .entry(Criterion::EvidenceCoverage)
            .or_default()
            .push(format!("fragment '{id}' supports no concept"));
    }

    let mut titles: BTreeMap<String, usize> = BTreeMap::new();
    for c in &input.novel {
        *titles.entry(c.title.to_lowercase()).or_default() += 1;
    }
    for (title, count) in titles.into_iter().filter(|(_, n)| *n > 1) {
        issues
            .entry(Criterion::Distinctness)
            .or_default()
            .push(format!("{count} novel concepts are titled '{title}'"));
    }

    let novel_ids: BTreeSet<_> = input.novel.iter().map(|c| &c.temp_id).collect();
    for r in input.relations {
        for endpoint in [&r.source, &r.target] {
            if let RelationEndpoint::Candidate { temp_id } = endpoint {
                if !novel_ids.contains(temp_id) {
                    issues
                        .entry(Criterion::RelationAccuracy)
                        .or_default()
                        .push(format!("{} relation references '{temp_id}', which is not a novel concept", r.kind));
                }
            }
        }
    }

    issues
}

fn merge_assessment(output: AssessmentOutput, mut prechecks: BTreeMap<Criterion, Vec<String>>) -> QualityAssessment {
    let mut by_criterion: BTreeMap<Criterion, (bool, Vec<String>)> = output
        .criteria
        .into_iter()
        .map(|c| (c.criterion, (c.passed, c.issues)))
        .collect();

    let criteria: Vec<CriterionResult> = Criterion::ALL
        .into_iter()
        .map(|criterion| {
            let (model_passed, mut issues) = by_criterion.remove(&criterion).unwrap_or((true, Vec::new()));
            let found = prechecks.remove(&criterion).unwrap_or_default();
            let passed = model_passed && found.is_empty();
            issues.extend(found);
            CriterionResult {
                criterion,
                passed,
                issues,
            }
        })
        .collect();

    QualityAssessment {
        passed: criteria.iter().all(|c| c.passed),
        criteria,
        summary: output.summary,
    }
}
