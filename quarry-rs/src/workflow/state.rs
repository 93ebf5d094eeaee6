//! Workflow state: the single mutable record of a run and unit of
//! checkpointing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::edges::RelationProposal;
use crate::errors::{QuarryError, Result};
use crate::nodes::{CandidateConcept, SourceUnit, SourceUnitId, TempId};
use crate::pipeline::{CommitSummary, DuplicateVerdict, QualityAssessment};

/// Phases move strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extracting,
    Reviewing,
    Committing,
    Done,
    Aborted,
}

impl Phase {
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Extracting, Phase::Reviewing)
                | (Phase::Extracting, Phase::Aborted)
                | (Phase::Reviewing, Phase::Committing)
                | (Phase::Reviewing, Phase::Aborted)
                | (Phase::Committing, Phase::Done)
                | (Phase::Committing, Phase::Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Aborted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Extracting => "extracting",
            Phase::Reviewing => "reviewing",
            Phase::Committing => "committing",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Next unit of work inside the extracting and reviewing phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Extract,
    DetectDuplicates,
    DeriveRelations,
    Assess,
    Refine,
    /// Suspended until a reviewer decides.
    AwaitReview,
}

/// Whether the current refine → assess cycle answers the quality gate or a
/// human reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Refinement,
    Feedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStep {
    CreateNodes,
    WriteRelations,
    WriteEvidence,
    Mirror,
    Finished,
}

/// Where a warning or error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Extract,
    Dedupe,
    Relations,
    Assess,
    Refine,
    Review,
    Commit,
    Mirror,
    Checkpoint,
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStage::Extract => "extract",
            WorkflowStage::Dedupe => "dedupe",
            WorkflowStage::Relations => "relations",
            WorkflowStage::Assess => "assess",
            WorkflowStage::Refine => "refine",
            WorkflowStage::Review => "review",
            WorkflowStage::Commit => "commit",
            WorkflowStage::Mirror => "mirror",
            WorkflowStage::Checkpoint => "checkpoint",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNote {
    pub stage: WorkflowStage,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl fmt::Display for WorkflowNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// One quality-gate verdict, kept for the review report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueRecord {
    pub pass: PassKind,
    pub refinement_iteration: u32,
    pub review_iteration: u32,
    pub assessment: QualityAssessment,
}

/// Progress of the commit phase. Survives restarts so a resumed commit
/// continues at its recorded step with the same durable ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitProgress {
    pub step: CommitStep,
    pub started_at: Option<DateTime<Utc>>,
    /// Temp id → durable id of every created node.
    pub node_ids: BTreeMap<TempId, Uuid>,
    pub edges_written: usize,
    pub evidence_written: usize,
    pub mirrored: BTreeSet<Uuid>,
    pub mirror_pending: BTreeSet<Uuid>,
}

impl Default for CommitProgress {
    fn default() -> Self {
        Self {
            step: CommitStep::CreateNodes,
            started_at: None,
            node_ids: BTreeMap::new(),
            edges_written: 0,
            evidence_written: 0,
            mirrored: BTreeSet::new(),
            mirror_pending: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: Uuid,
    pub batch_id: String,
    pub phase: Phase,
    pub step: Step,
    pub pass: PassKind,

    pub sources: Vec<SourceUnit>,
    pub hints: Option<String>,

    /// Extraction generation; bumps on every extraction or refinement so
    /// temp ids are never reused inside a run.
    pub candidate_generation: u32,
    pub refinement_iterations: u32,
    pub review_iterations: u32,

    pub candidates: Vec<CandidateConcept>,
    pub unattributed: BTreeSet<SourceUnitId>,
    pub embeddings: BTreeMap<TempId, Vec<f32>>,
    pub verdicts: BTreeMap<TempId, DuplicateVerdict>,
    pub relations: Vec<RelationProposal>,
    /// Novel concepts whose relation branch already ran.
    pub relation_branches_done: BTreeSet<TempId>,
    /// Titles of committed concepts seen during similarity lookups.
    pub known_titles: BTreeMap<Uuid, String>,

    pub assessment: Option<QualityAssessment>,
    pub critiques: Vec<CritiqueRecord>,

    pub pending_feedback: Option<String>,
    pub feedback_history: Vec<String>,
    /// Critique or feedback the deduplication and relation steps of the
    /// current revision pass must follow. Cleared once relations are derived.
    #[serde(default)]
    pub guidance: Option<String>,
    pub approved: bool,

    pub commit: CommitProgress,
    pub summary: Option<CommitSummary>,

    pub errors: Vec<WorkflowNote>,
    pub warnings: Vec<WorkflowNote>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(batch_id: impl Into<String>, sources: Vec<SourceUnit>, hints: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            batch_id: batch_id.into(),
            phase: Phase::Extracting,
            step: Step::Extract,
            pass: PassKind::Refinement,
            sources,
            hints,
            candidate_generation: 0,
            refinement_iterations: 0,
            review_iterations: 0,
            candidates: Vec::new(),
            unattributed: BTreeSet::new(),
            embeddings: BTreeMap::new(),
            verdicts: BTreeMap::new(),
            relations: Vec::new(),
            relation_branches_done: BTreeSet::new(),
            known_titles: BTreeMap::new(),
            assessment: None,
            critiques: Vec::new(),
            pending_feedback: None,
            feedback_history: Vec::new(),
            guidance: None,
            approved: false,
            commit: CommitProgress::default(),
            summary: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting backward or skipping transitions.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(QuarryError::Validation(format!(
                "illegal phase transition {} -> {next}",
                self.phase
            )));
        }
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn warn(&mut self, stage: WorkflowStage, message: impl Into<String>) {
        self.warnings.push(WorkflowNote {
            stage,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn error(&mut self, stage: WorkflowStage, message: impl Into<String>) {
        self.errors.push(WorkflowNote {
            stage,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn candidate(&self, temp_id: &TempId) -> Option<&CandidateConcept> {
        self.candidates.iter().find(|c| &c.temp_id == temp_id)
    }

    /// A candidate is novel unless judged a duplicate.
    pub fn is_novel(&self, candidate: &CandidateConcept) -> bool {
        self.verdicts
            .get(&candidate.temp_id)
            .map_or(true, |v| !v.is_duplicate)
    }

    pub fn novel_candidates(&self) -> Vec<&CandidateConcept> {
        self.candidates.iter().filter(|c| self.is_novel(c)).collect()
    }

    pub fn duplicate_candidates(&self) -> Vec<(&CandidateConcept, &DuplicateVerdict)> {
        self.candidates
            .iter()
            .filter_map(|c| {
                self.verdicts
                    .get(&c.temp_id)
                    .filter(|v| v.is_duplicate)
                    .map(|v| (c, v))
            })
            .collect()
    }

    /// Replace the candidate set, discarding everything derived from the
    /// previous one.
    pub fn replace_candidates(&mut self, candidates: Vec<CandidateConcept>, unattributed: BTreeSet<SourceUnitId>) {
        self.candidates = candidates;
        self.unattributed = unattributed;
        self.embeddings.clear();
        self.verdicts.clear();
        self.relations.clear();
        self.relation_branches_done.clear();
        self.assessment = None;
        self.candidate_generation += 1;
    }

    pub fn source(&self, id: &SourceUnitId) -> Option<&SourceUnit> {
        self.sources.iter().find(|s| &s.id == id)
    }
}
