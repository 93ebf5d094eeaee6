//! End-to-end workflow runs against in-process doubles.

mod helpers;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use helpers::*;
use quarry_rs::checkpoint::{CheckpointStore, FsCheckpointStore, MemoryCheckpointStore};
use quarry_rs::driver::InMemoryDriver;
use quarry_rs::edges::RelationKind;
use quarry_rs::errors::LlmError;
use quarry_rs::nodes::SourceUnitId;
use quarry_rs::testing::{FlakyDriver, RecordingMirror};
use quarry_rs::workflow::{CommitProgress, CommitStep, Phase, Step, WorkflowStage};
use quarry_rs::{QuarryError, ReviewDecision, WorkflowOutcome};
use serde_json::json;

fn ids(list: &[&str]) -> BTreeSet<SourceUnitId> {
    list.iter().map(|s| SourceUnitId::from(*s)).collect()
}

#[tokio::test]
async fn duplicate_and_relation_scenario_commits_expected_graph() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let store = MemoryCheckpointStore::new();
    let engine = engine(&llm, &embedder, driver.clone(), &mirror, store.clone(), config());

    let outcome = engine.start("stoics-1", sources(), None).await.unwrap();
    let WorkflowOutcome::AwaitingReview { handle, report } = outcome else {
        panic!("expected review, got {outcome:?}");
    };
    assert_eq!(report.novel.len(), 1);
    assert_eq!(report.novel[0].title, A_TITLE);
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.duplicates[0].matched_node_id, Some(x));
    assert_eq!(report.duplicates[0].confidence, 0.9);
    assert_eq!(report.relations.len(), 1);
    assert_eq!(report.relations[0].target, X_TITLE);
    assert_eq!(report.relations[0].reciprocal, RelationKind::HasPart);
    assert_eq!(report.assessment_passed, Some(true));
    // A has no neighbour above the floor, so only B is judged.
    assert_eq!(llm.calls(DEDUPE), 1);
    assert_eq!(driver.concept_count(), 1, "nothing is written before approval");

    let outcome = engine.resume(&handle, ReviewDecision::Approve).await.unwrap();
    let WorkflowOutcome::Committed { summary, .. } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    assert_eq!(summary.nodes_created, 1);
    assert_eq!(summary.edges_written, 2);
    assert_eq!(summary.evidence_links, 3);
    assert_eq!(summary.duplicates_merged, 1);
    assert!(summary.mirror_pending.is_empty());

    let a = driver.find_by_title(A_TITLE).expect("A committed");
    assert_eq!(driver.concept_count(), 2);
    assert!(driver.find_by_title(B_TITLE).is_none());
    assert!(driver.has_relation(a.id, x, RelationKind::PartOf));
    assert!(driver.has_relation(x, a.id, RelationKind::HasPart));
    assert_eq!(driver.relations().len(), 2);
    assert_eq!(driver.evidence_for(a.id), ids(&["q1", "q2"]));
    assert_eq!(driver.evidence_for(x), ids(&["q3"]));

    let written = mirror.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].title, A_TITLE);
    assert_eq!(written[0].outgoing, vec![("PART_OF".to_string(), X_TITLE.to_string())]);
    assert_eq!(written[0].incoming, vec![("HAS_PART".to_string(), X_TITLE.to_string())]);
    assert!(store.is_archived(&handle));
}

#[tokio::test]
async fn dedup_timeout_treats_candidate_as_novel() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    llm.stall_on(DEDUPE, Duration::from_millis(300));
    let mirror = RecordingMirror::new();
    let engine = engine(&llm, &embedder, driver.clone(), &mirror, MemoryCheckpointStore::new(), config());

    let outcome = engine.start("stoics-2", sources(), None).await.unwrap();
    let WorkflowOutcome::AwaitingReview { handle, report } = outcome else {
        panic!("expected review, got {outcome:?}");
    };
    assert_eq!(report.novel.len(), 2);
    assert!(report.duplicates.is_empty());
    assert_eq!(llm.calls(DEDUPE), 2, "one retry after the first timeout");
    assert!(report
        .warnings
        .iter()
        .any(|w| w.stage == WorkflowStage::Dedupe && w.message.contains(B_TITLE)));
    assert!(report.to_markdown().contains("treated as novel"));

    let outcome = engine.resume(&handle, ReviewDecision::Approve).await.unwrap();
    assert!(matches!(outcome, WorkflowOutcome::Committed { .. }));
    let b = driver.find_by_title(B_TITLE).expect("B committed as novel");
    assert_eq!(driver.evidence_for(b.id), ids(&["q3"]));
    assert_eq!(driver.concept_count(), 3);
}

#[tokio::test]
async fn failing_gate_refines_up_to_the_bound_then_reviews() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    llm.respond(ASSESSMENT, assessment(false));
    let mirror = RecordingMirror::new();
    let engine = engine(&llm, &embedder, driver, &mirror, MemoryCheckpointStore::new(), config());

    let outcome = engine.start("stoics-3", sources(), None).await.unwrap();
    let WorkflowOutcome::AwaitingReview { report, .. } = outcome else {
        panic!("expected review, got {outcome:?}");
    };
    let bound = config().max_refinement_iterations;
    assert_eq!(report.refinement_iterations, bound);
    assert_eq!(report.critiques.len() as u32, bound + 1);
    assert_eq!(llm.calls(EXTRACTION) as u32, bound + 1);
    assert_eq!(report.assessment_passed, Some(false));
    assert!(report.outstanding_issues.iter().any(|i| i.starts_with("atomicity:")));
    assert!(report
        .warnings
        .iter()
        .any(|w| w.message.contains("refinement bound")));
    assert!(llm
        .payloads(EXTRACTION)
        .iter()
        .skip(1)
        .all(|p| p.contains("bundles two ideas")));
}

#[tokio::test]
async fn review_bound_aborts_without_committing() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let store = MemoryCheckpointStore::new();
    let engine = engine(&llm, &embedder, driver.clone(), &mirror, store.clone(), config());

    let mut handle = engine.start("stoics-4", sources(), None).await.unwrap().handle();
    for round in 1..=config().max_review_iterations {
        let outcome = engine
            .resume(&handle, ReviewDecision::Feedback(format!("round {round}: tighten the wording")))
            .await
            .unwrap();
        let WorkflowOutcome::AwaitingReview { handle: h, report } = outcome else {
            panic!("expected review, got {outcome:?}");
        };
        assert_eq!(report.review_iterations, round);
        assert_eq!(report.feedback_history.len() as u32, round);
        handle = h;
    }

    let outcome = engine
        .resume(&handle, ReviewDecision::Feedback("one more".to_string()))
        .await
        .unwrap();
    let WorkflowOutcome::Aborted { errors, .. } = outcome else {
        panic!("expected abort, got {outcome:?}");
    };
    assert!(errors.iter().any(|e| e.stage == WorkflowStage::Review));
    assert!(store.is_archived(&handle));
    assert_eq!(store.load(&handle).await.unwrap().phase, Phase::Aborted);
    assert_eq!(driver.concept_count(), 1);
    assert!(mirror.written().is_empty());

    let err = engine.resume(&handle, ReviewDecision::Approve).await.unwrap_err();
    assert!(matches!(err, QuarryError::Validation(_)));
}

#[tokio::test]
async fn feedback_reaches_the_revision_prompt() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let engine = engine(&llm, &embedder, driver, &mirror, MemoryCheckpointStore::new(), config());

    let handle = engine.start("stoics-5", sources(), None).await.unwrap().handle();
    let err = engine
        .resume(&handle, ReviewDecision::Feedback("   ".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Validation(_)));

    engine
        .resume(&handle, ReviewDecision::Feedback("Call it the dichotomy of control".to_string()))
        .await
        .unwrap();
    let payloads = llm.payloads(EXTRACTION);
    assert_eq!(payloads.len(), 2);
    assert!(payloads[1].contains("Call it the dichotomy of control"));
}

#[tokio::test]
async fn feedback_steers_duplicate_and_relation_judgements() {
    const FEEDBACK: &str = "Drop the PART_OF relation to Virtue; B is not a duplicate of Virtue";

    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let engine = engine(&llm, &embedder, driver, &mirror, MemoryCheckpointStore::new(), config());

    let outcome = engine.start("stoics-6", sources(), None).await.unwrap();
    let WorkflowOutcome::AwaitingReview { handle, report } = outcome else {
        panic!("expected review, got {outcome:?}");
    };
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.relations.len(), 1);

    // The doubles honour the reviewer only when the feedback reaches them.
    llm.on(DEDUPE, move |payload| {
        let judgement = if payload.contains("is not a duplicate") {
            json!({ "is_duplicate": false, "confidence": 0.9, "reasoning": "reviewer says distinct" })
        } else {
            json!({ "is_duplicate": true, "matched_node_id": x.to_string(), "confidence": 0.9, "reasoning": "same claim" })
        };
        Ok(judgement.to_string())
    });
    llm.on(RELATIONS, move |payload| {
        let relations = if payload.contains("Drop the PART_OF relation") {
            json!({ "relations": [] })
        } else {
            json!({ "relations": [{ "target_id": x.to_string(), "kind": "PART_OF", "explanation": "part", "confidence": 0.8 }] })
        };
        Ok(relations.to_string())
    });

    let outcome = engine
        .resume(&handle, ReviewDecision::Feedback(FEEDBACK.to_string()))
        .await
        .unwrap();
    let WorkflowOutcome::AwaitingReview { report, .. } = outcome else {
        panic!("expected review, got {outcome:?}");
    };

    let dedupe = llm.payloads(DEDUPE);
    assert_eq!(dedupe.len(), 2);
    assert!(!dedupe[0].contains("guidance"));
    assert!(dedupe[1].contains(FEEDBACK));

    // A on the first pass, A and B on the feedback pass.
    let relations = llm.payloads(RELATIONS);
    assert_eq!(relations.len(), 3);
    assert!(!relations[0].contains(FEEDBACK));
    assert!(relations[1..].iter().all(|p| p.contains(FEEDBACK)));

    assert!(report.duplicates.is_empty());
    assert!(report.relations.is_empty());
    assert_eq!(report.novel.len(), 2);

    let revision = llm.payloads(EXTRACTION).pop().unwrap();
    assert!(revision.contains("previous_decisions"));
    assert!(revision.contains("\"matched\": \"Virtue\""));
    assert!(revision.contains("\"kind\": \"PART_OF\""));
}

#[tokio::test]
async fn critique_reaches_the_stages_after_a_refinement() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let verdicts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&verdicts);
    llm.on(ASSESSMENT, move |_| {
        let first = seen.fetch_add(1, Ordering::SeqCst) == 0;
        Ok(assessment(!first).to_string())
    });
    let mirror = RecordingMirror::new();
    let engine = engine(&llm, &embedder, driver, &mirror, MemoryCheckpointStore::new(), config());

    let outcome = engine.start("stoics-7", sources(), None).await.unwrap();
    let WorkflowOutcome::AwaitingReview { report, .. } = outcome else {
        panic!("expected review, got {outcome:?}");
    };
    assert_eq!(report.refinement_iterations, 1);
    assert_eq!(report.assessment_passed, Some(true));

    let dedupe = llm.payloads(DEDUPE);
    assert_eq!(dedupe.len(), 2);
    assert!(dedupe[1].contains("bundles two ideas"));
    assert!(llm
        .payloads(RELATIONS)
        .last()
        .is_some_and(|p| p.contains("bundles two ideas")));
}

#[tokio::test]
async fn failed_extraction_is_retried_and_kept_out_of_errors() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    llm.on(EXTRACTION, move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(LlmError::Refusal.into())
        } else {
            Ok(extraction_output().to_string())
        }
    });
    let mirror = RecordingMirror::new();
    let engine = engine(&llm, &embedder, driver, &mirror, MemoryCheckpointStore::new(), config());

    let outcome = engine.start("stoics-8", sources(), None).await.unwrap();
    let WorkflowOutcome::AwaitingReview { report, .. } = outcome else {
        panic!("expected review, got {outcome:?}");
    };
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(report.refinement_iterations, 1);
    assert_eq!(report.novel.len(), 1);
    assert!(report.errors.is_empty());
    assert!(report
        .warnings
        .iter()
        .any(|w| w.stage == WorkflowStage::Extract && w.message.contains("extraction failed")));
}

#[tokio::test]
async fn commit_retries_transient_failures_and_is_idempotent() {
    let (inner, embedder, x) = seeded_graph();
    let driver = FlakyDriver::new(inner.clone(), 2);
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let store = MemoryCheckpointStore::new();
    let engine = engine(&llm, &embedder, driver.clone(), &mirror, store.clone(), config());

    let handle = engine.start("stoics-6", sources(), None).await.unwrap().handle();
    let outcome = engine.resume(&handle, ReviewDecision::Approve).await.unwrap();
    let WorkflowOutcome::Committed { summary, .. } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    let first_ids = summary.node_ids.clone();
    let snapshot = (inner.concepts(), inner.relations(), inner.evidence());

    // Replay the whole commit from the archived state.
    let mut state = store.load(&handle).await.unwrap();
    state.phase = Phase::Committing;
    state.summary = None;
    state.commit = CommitProgress {
        started_at: state.commit.started_at,
        ..CommitProgress::default()
    };
    store.save(&state).await.unwrap();
    let outcome = engine.recover(&handle).await.unwrap();
    let WorkflowOutcome::Committed { summary, .. } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };

    assert_eq!(summary.node_ids, first_ids);
    assert_eq!((inner.concepts(), inner.relations(), inner.evidence()), snapshot);
    assert_eq!(inner.concept_count(), 2);
}

#[tokio::test]
async fn exhausted_commit_attempts_abort_the_run() {
    let (inner, embedder, x) = seeded_graph();
    let driver = FlakyDriver::new(inner.clone(), 0);
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let store = MemoryCheckpointStore::new();
    let engine = engine(&llm, &embedder, driver.clone(), &mirror, store.clone(), config());

    let handle = engine.start("stoics-7", sources(), None).await.unwrap().handle();
    driver.fail_next(usize::MAX);
    let outcome = engine.resume(&handle, ReviewDecision::Approve).await.unwrap();
    let WorkflowOutcome::Aborted { errors, .. } = outcome else {
        panic!("expected abort, got {outcome:?}");
    };
    assert!(errors.iter().any(|e| e.stage == WorkflowStage::Commit));
    assert_eq!(driver.write_calls() as u32, config().commit_max_attempts);
    assert_eq!(inner.concept_count(), 1);

    let state = store.load(&handle).await.unwrap();
    assert_eq!(state.phase, Phase::Aborted);
    assert!(state.approved);
}

#[tokio::test]
async fn mirror_failure_flags_node_without_rollback() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    mirror.fail_title(A_TITLE);
    let engine = engine(&llm, &embedder, driver.clone(), &mirror, MemoryCheckpointStore::new(), config());

    let handle = engine.start("stoics-8", sources(), None).await.unwrap().handle();
    let outcome = engine.resume(&handle, ReviewDecision::Approve).await.unwrap();
    let WorkflowOutcome::Committed { summary, .. } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    let a = driver.find_by_title(A_TITLE).expect("graph write kept");
    assert_eq!(summary.mirror_pending, vec![a.id]);
    assert!(mirror.written().is_empty());
}

#[tokio::test]
async fn suspended_run_survives_a_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();

    let handle = {
        let store = FsCheckpointStore::open(dir.path()).await.unwrap();
        let first = engine(&llm, &embedder, driver.clone(), &mirror, store, config());
        first.start("stoics-9", sources(), None).await.unwrap().handle()
    };
    assert_eq!(llm.calls(EXTRACTION), 1);

    let store = FsCheckpointStore::open(dir.path()).await.unwrap();
    let second = engine(&llm, &embedder, driver.clone(), &mirror, store, config());
    let report = second.report(&handle).await.unwrap();
    assert_eq!(report.novel[0].title, A_TITLE);

    let outcome = second.resume(&handle, ReviewDecision::Approve).await.unwrap();
    assert!(matches!(outcome, WorkflowOutcome::Committed { .. }));
    assert_eq!(llm.calls(EXTRACTION), 1, "phase 1 is not re-run on resume");
    assert_eq!(driver.concept_count(), 2);
    assert!(dir.path().join("archive").join(format!("{handle}.json")).exists());
}

#[tokio::test]
async fn recovery_resumes_at_the_recorded_step() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let store = MemoryCheckpointStore::new();
    let engine = engine(&llm, &embedder, driver.clone(), &mirror, store.clone(), config());

    // A run that crashed after extraction and the first dedup branch.
    let reference = engine.start("stoics-10", sources(), None).await.unwrap().handle();
    let mut state = store.load(&reference).await.unwrap();
    state.run_id = uuid::Uuid::new_v4();
    state.phase = Phase::Extracting;
    state.step = Step::DetectDuplicates;
    let b = state
        .candidates
        .iter()
        .find(|c| c.title == B_TITLE)
        .map(|c| c.temp_id.clone())
        .unwrap();
    state.verdicts.retain(|temp_id, _| *temp_id == b);
    state.relations.clear();
    state.relation_branches_done.clear();
    state.critiques.clear();
    state.assessment = None;
    let handle = store.save(&state).await.unwrap();

    let extraction_calls = llm.calls(EXTRACTION);
    let dedupe_calls = llm.calls(DEDUPE);
    let outcome = engine.recover(&handle).await.unwrap();
    let WorkflowOutcome::AwaitingReview { report, .. } = outcome else {
        panic!("expected review, got {outcome:?}");
    };
    assert_eq!(llm.calls(EXTRACTION), extraction_calls);
    assert_eq!(llm.calls(DEDUPE), dedupe_calls, "recorded verdicts are not judged again");
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.relations.len(), 1);

    let again = engine.recover(&handle).await.unwrap();
    assert!(matches!(again, WorkflowOutcome::AwaitingReview { .. }));
    assert_eq!(store.load(&handle).await.unwrap().commit.step, CommitStep::CreateNodes);
}

#[tokio::test]
async fn empty_batches_and_duplicate_ids_are_rejected() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let engine = engine(&llm, &embedder, driver, &mirror, MemoryCheckpointStore::new(), config());

    let err = engine.start("empty", vec![], None).await.unwrap_err();
    assert!(matches!(err, QuarryError::Validation(_)));

    let mut twice = sources();
    twice.push(twice[0].clone());
    let err = engine.start("twice", twice, None).await.unwrap_err();
    assert!(err.to_string().contains("q1"));
    assert_eq!(llm.calls(EXTRACTION), 0);
}

#[tokio::test]
async fn unavailable_checkpoint_store_fails_the_start() {
    let (driver, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let store = MemoryCheckpointStore::new();
    store.set_unavailable(true);
    let engine = engine(&llm, &embedder, driver, &mirror, store, config());

    let err = engine.start("offline", sources(), None).await.unwrap_err();
    assert!(matches!(err, QuarryError::Checkpoint(_)));
    assert_eq!(llm.calls(EXTRACTION), 0);
}

#[tokio::test]
async fn empty_graph_runs_without_dedup_calls() {
    let (_, embedder, x) = seeded_graph();
    let llm = scripted_llm(x);
    let mirror = RecordingMirror::new();
    let driver = InMemoryDriver::new();
    let engine = engine(&llm, &embedder, driver.clone(), &mirror, MemoryCheckpointStore::new(), config());

    let handle = engine.start("fresh", sources(), None).await.unwrap().handle();
    assert_eq!(llm.calls(DEDUPE), 0);
    let outcome = engine.resume(&handle, ReviewDecision::Approve).await.unwrap();
    let WorkflowOutcome::Committed { summary, .. } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    assert_eq!(summary.nodes_created, 2);
    assert_eq!(driver.evidence().len(), 3);
}
