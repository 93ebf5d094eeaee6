//! The workflow controller.
//!
//! A run moves through three phases:
//!
//! 1. **Extracting**: `extract → detect duplicates → derive relations →
//!    assess`, then `refine → detect duplicates → …` while the quality gate
//!    fails and the refinement bound allows.
//! 2. **Reviewing**: the run suspends with a [`ReviewReport`]. The reviewer
//!    either approves or sends free-text feedback, which triggers one
//!    feedback pass and a new report.
//! 3. **Committing**: nodes, edges, evidence links, then the mirror.
//!
//! The state is checkpointed after every step. [`WorkflowEngine::resume`] is
//! the only way past the review suspension point; [`WorkflowEngine::recover`]
//! continues a run interrupted mid-step.

pub mod report;
pub mod state;

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::checkpoint::{CheckpointHandle, CheckpointStore};
use crate::driver::GraphDriver;
use crate::embedder::EmbedderClient;
use crate::errors::{QuarryError, Result};
use crate::gateway::{with_retry, RetryPolicy, SimilarityGateway, StructuredGateway};
use crate::llm_client::LlmClient;
use crate::mirror::{MirrorWriter, TitleResolver};
use crate::nodes::{CandidateConcept, SourceUnit, TempId};
use crate::pipeline::assess::{assess_extraction, AssessmentInput};
use crate::pipeline::commit::{
    mirror_nodes, plan_commit, write_evidence, write_nodes, write_relations, CommitPlan,
};
use crate::pipeline::dedupe::detect_duplicates;
use crate::pipeline::extract::extract_candidates;
use crate::pipeline::refine::refine_candidates;
use crate::pipeline::relations::{derive_relations, fold_failures, merge_proposals};
use crate::pipeline::{CommitSummary, ExtractionResult};
use crate::prompts::refine::Revision;
use crate::types::WorkflowConfig;

pub use report::ReviewReport;
pub use state::{
    CommitProgress, CommitStep, CritiqueRecord, PassKind, Phase, Step, WorkflowNote, WorkflowStage,
    WorkflowState,
};

/// The reviewer's answer to a suspended run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Feedback(String),
}

/// Where a call into the engine left the run.
#[derive(Debug, Clone)]
pub enum WorkflowOutcome {
    AwaitingReview {
        handle: CheckpointHandle,
        report: Box<ReviewReport>,
    },
    Committed {
        handle: CheckpointHandle,
        summary: CommitSummary,
    },
    Aborted {
        handle: CheckpointHandle,
        errors: Vec<WorkflowNote>,
    },
}

impl WorkflowOutcome {
    pub fn handle(&self) -> CheckpointHandle {
        match self {
            WorkflowOutcome::AwaitingReview { handle, .. }
            | WorkflowOutcome::Committed { handle, .. }
            | WorkflowOutcome::Aborted { handle, .. } => *handle,
        }
    }
}

/// Drives runs from extraction to commit.
pub struct WorkflowEngine<L, E, G, M, C> {
    generation: StructuredGateway<L>,
    embedder: E,
    driver: G,
    mirror: M,
    store: C,
    config: WorkflowConfig,
}

impl<L, E, G, M, C> WorkflowEngine<L, E, G, M, C>
where
    L: LlmClient,
    E: EmbedderClient,
    G: GraphDriver,
    M: MirrorWriter,
    C: CheckpointStore,
{
    pub fn new(llm: L, embedder: E, driver: G, mirror: M, store: C, config: WorkflowConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| QuarryError::Validation(e.to_string()))?;
        Ok(Self {
            generation: StructuredGateway::new(llm, config.retry.clone()),
            embedder,
            driver,
            mirror,
            store,
            config,
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn driver(&self) -> &G {
        &self.driver
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    fn similarity(&self) -> SimilarityGateway<'_, E, G> {
        SimilarityGateway::new(&self.embedder, &self.driver, &self.config.retry)
    }

    /// Start a run over `sources` and drive it to the review suspension point.
    pub async fn start(
        &self,
        batch_id: impl Into<String>,
        sources: Vec<SourceUnit>,
        hints: Option<String>,
    ) -> Result<WorkflowOutcome> {
        if sources.is_empty() {
            return Err(QuarryError::Validation("a batch needs at least one source unit".to_string()));
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = sources.iter().find(|s| !seen.insert(&s.id)) {
            return Err(QuarryError::Validation(format!("duplicate source unit id '{}'", dup.id)));
        }

        let state = WorkflowState::new(batch_id, sources, hints);
        info!(
            run_id = %state.run_id,
            batch_id = %state.batch_id,
            fragments = state.sources.len(),
            "workflow started"
        );
        self.store.save(&state).await?;
        self.drive(state).await
    }

    /// Answer a run suspended at review.
    pub async fn resume(&self, handle: &CheckpointHandle, decision: ReviewDecision) -> Result<WorkflowOutcome> {
        let mut state = self.store.load(handle).await?;
        if state.phase != Phase::Reviewing || state.step != Step::AwaitReview {
            return Err(QuarryError::Validation(format!(
                "run {handle} is not awaiting review (phase {})",
                state.phase
            )));
        }

        match decision {
            ReviewDecision::Approve => {
                info!(run_id = %state.run_id, "review approved");
                state.approved = true;
                state.advance(Phase::Committing)?;
                state.commit = CommitProgress {
                    started_at: Some(Utc::now()),
                    ..CommitProgress::default()
                };
                // No graph write happens before this checkpoint lands.
                if let Err(e) = self.store.save(&state).await {
                    return Ok(self.abort(state, WorkflowStage::Checkpoint, e.to_string()).await);
                }
            }
            ReviewDecision::Feedback(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(QuarryError::Validation("review feedback is empty".to_string()));
                }
                let bound = self.config.max_review_iterations;
                if state.review_iterations >= bound {
                    warn!(run_id = %state.run_id, bound, "review bound exhausted");
                    state.error(
                        WorkflowStage::Review,
                        format!("no approval after {bound} feedback passes; run aborted"),
                    );
                    return Ok(self.abort_with(state).await);
                }
                state.review_iterations += 1;
                info!(run_id = %state.run_id, iteration = state.review_iterations, "review feedback received");
                state.pending_feedback = Some(text.to_string());
                state.pass = PassKind::Feedback;
                state.step = Step::Refine;
            }
        }
        self.drive(state).await
    }

    /// Continue a run from its last checkpoint.
    ///
    /// A run in `extracting` resumes at its recorded step, `committing`
    /// resumes at its recorded commit step, a suspended run re-emits its
    /// report and a terminal run reports its outcome.
    pub async fn recover(&self, handle: &CheckpointHandle) -> Result<WorkflowOutcome> {
        let state = self.store.load(handle).await?;
        info!(
            run_id = %state.run_id,
            phase = %state.phase,
            step = ?state.step,
            commit_step = ?state.commit.step,
            "recovering run"
        );
        self.drive(state).await
    }

    /// Build the review report of a saved run.
    pub async fn report(&self, handle: &CheckpointHandle) -> Result<ReviewReport> {
        let state = self.store.load(handle).await?;
        Ok(ReviewReport::from_state(&state))
    }

    async fn drive(&self, mut state: WorkflowState) -> Result<WorkflowOutcome> {
        let handle = CheckpointHandle(state.run_id);
        loop {
            match state.phase {
                Phase::Done => {
                    self.archive(&handle).await;
                    return Ok(WorkflowOutcome::Committed {
                        handle,
                        summary: state.summary.unwrap_or_default(),
                    });
                }
                Phase::Aborted => {
                    self.archive(&handle).await;
                    return Ok(WorkflowOutcome::Aborted {
                        handle,
                        errors: state.errors,
                    });
                }
                Phase::Committing => {
                    if let Err(e) = self.commit_step(&mut state).await {
                        error!(run_id = %state.run_id, step = ?state.commit.step, error = %e, "commit failed");
                        return Ok(self.abort(state, WorkflowStage::Commit, e.to_string()).await);
                    }
                }
                Phase::Extracting | Phase::Reviewing => {
                    if state.step == Step::AwaitReview {
                        info!(
                            run_id = %state.run_id,
                            novel = state.novel_candidates().len(),
                            relations = state.relations.len(),
                            "awaiting review"
                        );
                        let report = Box::new(ReviewReport::from_state(&state));
                        return Ok(WorkflowOutcome::AwaitingReview { handle, report });
                    }
                    if let Err(e) = self.run_step(&mut state).await {
                        error!(run_id = %state.run_id, step = ?state.step, error = %e, "workflow step failed");
                        return Ok(self.abort(state, WorkflowStage::Review, e.to_string()).await);
                    }
                }
            }

            state.updated_at = Utc::now();
            if let Err(e) = self.store.save(&state).await {
                error!(run_id = %state.run_id, error = %e, "checkpoint failed");
                return Ok(self.abort(state, WorkflowStage::Checkpoint, e.to_string()).await);
            }
        }
    }

    /// Record a fatal error and abort.
    async fn abort(&self, mut state: WorkflowState, stage: WorkflowStage, reason: String) -> WorkflowOutcome {
        state.error(stage, reason);
        self.abort_with(state).await
    }

    async fn abort_with(&self, mut state: WorkflowState) -> WorkflowOutcome {
        let handle = CheckpointHandle(state.run_id);
        if state.phase.can_advance_to(Phase::Aborted) {
            state.phase = Phase::Aborted;
        }
        state.updated_at = Utc::now();
        error!(run_id = %state.run_id, errors = state.errors.len(), "run aborted");
        match self.store.save(&state).await {
            Ok(_) => self.archive(&handle).await,
            Err(e) => error!(run_id = %state.run_id, error = %e, "could not checkpoint aborted run"),
        }
        WorkflowOutcome::Aborted {
            handle,
            errors: state.errors,
        }
    }

    async fn archive(&self, handle: &CheckpointHandle) {
        if let Err(e) = self.store.archive(handle).await {
            warn!(run_id = %handle, error = %e, "could not archive run");
        }
    }

    async fn run_step(&self, state: &mut WorkflowState) -> Result<()> {
        debug!(run_id = %state.run_id, step = ?state.step, pass = ?state.pass, "running step");
        match state.step {
            Step::Extract => self.extract_step(state).await,
            Step::DetectDuplicates => {
                self.dedupe_step(state).await;
                Ok(())
            }
            Step::DeriveRelations => {
                self.relations_step(state).await;
                Ok(())
            }
            Step::Assess => self.assess_step(state).await,
            Step::Refine => self.refine_step(state).await,
            Step::AwaitReview => Ok(()),
        }
    }

    fn to_review(&self, state: &mut WorkflowState) -> Result<()> {
        if state.phase == Phase::Extracting {
            state.advance(Phase::Reviewing)?;
        }
        state.step = Step::AwaitReview;
        Ok(())
    }

    fn apply_extraction(&self, state: &mut WorkflowState, stage: WorkflowStage, result: ExtractionResult) {
        for warning in result.warnings {
            state.warn(stage, warning);
        }
        if !result.unattributed.is_empty() {
            let ids: Vec<&str> = result.unattributed.iter().map(|id| id.as_str()).collect();
            state.warn(
                stage,
                format!("{} fragment(s) support no concept: {}", ids.len(), ids.join(", ")),
            );
        }
        state.replace_candidates(result.candidates, result.unattributed);
    }

    async fn extract_step(&self, state: &mut WorkflowState) -> Result<()> {
        let result = extract_candidates(
            &self.generation,
            &state.sources,
            state.hints.as_deref(),
            state.candidate_generation,
        )
        .await;

        match result {
            Ok(result) => {
                self.apply_extraction(state, WorkflowStage::Extract, result);
                state.step = Step::DetectDuplicates;
            }
            Err(failure) => {
                warn!(run_id = %state.run_id, %failure, "extraction failed");
                state.warn(WorkflowStage::Extract, format!("extraction failed: {failure}"));
                if state.refinement_iterations < self.config.max_refinement_iterations {
                    // Retrying extraction spends a refinement iteration.
                    state.refinement_iterations += 1;
                } else {
                    state.warn(
                        WorkflowStage::Extract,
                        "extraction retries exhausted; handing over to review with no candidates",
                    );
                    self.to_review(state)?;
                }
            }
        }
        Ok(())
    }

    async fn dedupe_step(&self, state: &mut WorkflowState) {
        let pending: Vec<&CandidateConcept> = state
            .candidates
            .iter()
            .filter(|c| !state.verdicts.contains_key(&c.temp_id))
            .collect();
        let outcomes = if pending.is_empty() {
            Vec::new()
        } else {
            detect_duplicates(
                &self.generation,
                &self.similarity(),
                &pending,
                state.guidance.as_deref(),
                &self.config,
            )
            .await
        };

        for outcome in outcomes {
            let temp_id = outcome.verdict.temp_id.clone();
            if let Some(embedding) = outcome.embedding {
                state.embeddings.insert(temp_id.clone(), embedding);
            }
            for neighbour in &outcome.neighbours {
                state
                    .known_titles
                    .entry(neighbour.id)
                    .or_insert_with(|| neighbour.title.clone());
            }
            if let Some(warning) = outcome.warning {
                state.warn(WorkflowStage::Dedupe, warning);
            }
            state.verdicts.insert(temp_id, outcome.verdict);
        }
        state.step = Step::DeriveRelations;
    }

    async fn relations_step(&self, state: &mut WorkflowState) {
        let novel = state.novel_candidates();
        let scheduled: Vec<&CandidateConcept> = novel
            .iter()
            .copied()
            .filter(|c| !state.relation_branches_done.contains(&c.temp_id))
            .collect();
        let results = if scheduled.is_empty() {
            Vec::new()
        } else {
            derive_relations(
                &self.generation,
                &self.similarity(),
                &scheduled,
                &novel,
                state.guidance.as_deref(),
                &self.config,
            )
            .await
        };

        let failures = fold_failures(&results);
        for (temp_id, result) in results {
            state.relation_branches_done.insert(temp_id);
            let Ok(branch) = result else { continue };
            for node in &branch.pool {
                state
                    .known_titles
                    .entry(node.id)
                    .or_insert_with(|| node.title.clone());
            }
            for warning in branch.warnings {
                state.warn(WorkflowStage::Relations, warning);
            }
            merge_proposals(&mut state.relations, branch.proposals);
        }
        for (_, reason) in failures {
            state.warn(WorkflowStage::Relations, reason);
        }
        state.guidance = None;
        state.step = Step::Assess;
    }

    async fn assess_step(&self, state: &mut WorkflowState) -> Result<()> {
        let input = AssessmentInput {
            sources: &state.sources,
            novel: state.novel_candidates(),
            duplicates: state.duplicate_candidates(),
            relations: &state.relations,
            unattributed: &state.unattributed,
        };
        let result = assess_extraction(&self.generation, &input).await;

        let assessment = match result {
            Ok(a) => a,
            Err(failure) => {
                warn!(run_id = %state.run_id, %failure, "quality gate unavailable");
                state.warn(
                    WorkflowStage::Assess,
                    format!("quality gate failed ({failure}); handing over to review"),
                );
                return self.to_review(state);
            }
        };

        let passed = assessment.passed;
        state.critiques.push(CritiqueRecord {
            pass: state.pass,
            refinement_iteration: state.refinement_iterations,
            review_iteration: state.review_iterations,
            assessment: assessment.clone(),
        });
        state.assessment = Some(assessment);

        let pass = state.pass;
        match pass {
            PassKind::Feedback => self.to_review(state),
            PassKind::Refinement if passed => {
                info!(run_id = %state.run_id, iterations = state.refinement_iterations, "quality gate passed");
                self.to_review(state)
            }
            PassKind::Refinement => {
                let bound = self.config.max_refinement_iterations;
                if state.refinement_iterations < bound {
                    state.refinement_iterations += 1;
                    state.step = Step::Refine;
                    Ok(())
                } else {
                    state.warn(
                        WorkflowStage::Assess,
                        format!("refinement bound of {bound} reached with failing criteria; handing over to review"),
                    );
                    self.to_review(state)
                }
            }
        }
    }

    async fn refine_step(&self, state: &mut WorkflowState) -> Result<()> {
        let critique = state.assessment.as_ref().map(|a| a.issues()).unwrap_or_default();
        let summary = state
            .assessment
            .as_ref()
            .map(|a| a.summary.clone())
            .unwrap_or_default();
        let feedback = state.pending_feedback.clone().unwrap_or_default();
        let unattributed: Vec<String> = state.unattributed.iter().map(|id| id.to_string()).collect();
        let prior = ReviewReport::from_state(state).prior_decisions();
        let revision = match state.pass {
            PassKind::Refinement => Revision::Critique {
                issues: &critique,
                summary: &summary,
            },
            PassKind::Feedback => Revision::Feedback {
                text: &feedback,
                critique: &critique,
            },
        };

        let result = refine_candidates(
            &self.generation,
            &state.sources,
            &state.candidates,
            &unattributed,
            &prior,
            revision,
            state.candidate_generation,
        )
        .await;
        let guidance = revision.guidance();

        if state.pass == PassKind::Feedback {
            if let Some(text) = state.pending_feedback.take() {
                state.feedback_history.push(text);
            }
        }

        match result {
            Ok(result) => {
                self.apply_extraction(state, WorkflowStage::Refine, result);
                state.guidance = Some(guidance);
                state.step = Step::DetectDuplicates;
                Ok(())
            }
            Err(failure) => {
                warn!(run_id = %state.run_id, %failure, "refinement failed");
                state.warn(
                    WorkflowStage::Refine,
                    format!("revision failed ({failure}); keeping the current candidates"),
                );
                self.to_review(state)
            }
        }
    }

    fn commit_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.commit_max_attempts,
            ..self.config.retry.clone()
        }
    }

    /// Run the recorded commit step. An error is fatal for the run.
    async fn commit_step(&self, state: &mut WorkflowState) -> Result<()> {
        let created_at = state.commit.started_at.unwrap_or(state.updated_at);
        let policy = self.commit_policy();

        match state.commit.step {
            CommitStep::CreateNodes => {
                self.fill_missing_embeddings(state).await;
                let plan = plan_commit(state, created_at);
                for skipped in &plan.skipped {
                    state.warn(WorkflowStage::Commit, skipped.clone());
                }
                let created = with_retry(&policy, "create concept nodes", || write_nodes(&self.driver, &plan)).await?;
                info!(run_id = %state.run_id, created, "concept nodes written");
                state.commit.node_ids = plan.nodes.iter().map(|(t, n)| (t.clone(), n.id)).collect();
                state.commit.step = CommitStep::WriteRelations;
            }
            CommitStep::WriteRelations => {
                let plan = plan_commit(state, created_at);
                let (written, skipped) =
                    with_retry(&policy, "write relations", || write_relations(&self.driver, &plan)).await?;
                info!(run_id = %state.run_id, written, "relations written");
                for reason in skipped {
                    state.warn(WorkflowStage::Commit, reason);
                }
                state.commit.edges_written = written;
                state.commit.step = CommitStep::WriteEvidence;
            }
            CommitStep::WriteEvidence => {
                let plan = plan_commit(state, created_at);
                let written = with_retry(&policy, "write evidence", || {
                    write_evidence(&self.driver, &plan, &state.sources)
                })
                .await?;
                info!(run_id = %state.run_id, written, "evidence links written");
                state.commit.evidence_written = written;
                state.commit.step = CommitStep::Mirror;
            }
            CommitStep::Mirror => {
                let plan = plan_commit(state, created_at);
                let titles = self.title_resolver(state, &plan).await;
                let outcome = mirror_nodes(&self.mirror, &plan, &titles, &state.sources, &state.commit.mirrored).await;
                for id in &outcome.mirrored {
                    state.commit.mirror_pending.remove(id);
                }
                state.commit.mirrored.extend(outcome.mirrored);
                state.commit.mirror_pending.extend(outcome.pending);
                for failure in outcome.failures {
                    state.warn(WorkflowStage::Mirror, format!("{failure}; flagged mirror_pending"));
                }
                state.commit.step = CommitStep::Finished;
            }
            CommitStep::Finished => {
                let summary = CommitSummary {
                    node_ids: state.commit.node_ids.clone(),
                    nodes_created: state.commit.node_ids.len(),
                    edges_written: state.commit.edges_written,
                    evidence_links: state.commit.evidence_written,
                    duplicates_merged: state.duplicate_candidates().len(),
                    mirror_pending: state.commit.mirror_pending.iter().copied().collect(),
                };
                info!(
                    run_id = %state.run_id,
                    nodes = summary.nodes_created,
                    edges = summary.edges_written,
                    evidence = summary.evidence_links,
                    mirror_pending = summary.mirror_pending.len(),
                    "run committed"
                );
                state.summary = Some(summary);
                state.advance(Phase::Done)?;
            }
        }
        Ok(())
    }

    /// Embed novel candidates whose dedup branch never produced a vector.
    async fn fill_missing_embeddings(&self, state: &mut WorkflowState) {
        let missing: Vec<(TempId, String)> = state
            .novel_candidates()
            .into_iter()
            .filter(|c| !state.embeddings.contains_key(&c.temp_id))
            .map(|c| (c.temp_id.clone(), c.embedding_text()))
            .collect();
        if missing.is_empty() {
            return;
        }
        let texts: Vec<&str> = missing.iter().map(|(_, t)| t.as_str()).collect();
        match self.similarity().embed_many(&texts).await {
            Ok(embeddings) => {
                for ((temp_id, _), embedding) in missing.iter().zip(embeddings) {
                    state.embeddings.insert(temp_id.clone(), embedding);
                }
            }
            Err(e) => state.warn(
                WorkflowStage::Commit,
                format!("{} concept(s) committed without an embedding: {e}", missing.len()),
            ),
        }
    }

    async fn title_resolver(&self, state: &WorkflowState, plan: &CommitPlan) -> TitleResolver {
        let mut titles: TitleResolver = state
            .known_titles
            .iter()
            .map(|(id, title)| (*id, title.clone()))
            .collect();
        for verdict in state.verdicts.values() {
            if let (Some(id), Some(title)) = (verdict.matched_node_id, &verdict.matched_title) {
                titles.insert(id, title.clone());
            }
        }
        for (_, node) in &plan.nodes {
            titles.insert(node.id, node.title.clone());
        }
        for edge in &plan.edges {
            for id in [edge.source_id, edge.target_id] {
                if titles.resolve(id).is_some() {
                    continue;
                }
                match self.driver.get_concept(id).await {
                    Ok(Some(node)) => titles.insert(id, node.title),
                    Ok(None) => debug!(node = %id, "link target has no title"),
                    Err(e) => debug!(node = %id, error = %e, "title lookup failed"),
                }
            }
        }
        titles
    }
}
