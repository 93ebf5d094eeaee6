//! Shared fixtures for the workflow integration tests.
//!
//! The standard scenario is a batch of three fragments. Extraction proposes
//! concept A from `q1` and `q2` and concept B from `q3`. B restates the
//! concept X already in the graph, and A is `PART_OF` X.

#![allow(dead_code)]

use chrono::Utc;
use quarry_rs::checkpoint::CheckpointStore;
use quarry_rs::driver::{GraphDriver, InMemoryDriver};
use quarry_rs::gateway::RetryPolicy;
use quarry_rs::nodes::{ConceptNode, SourceUnit};
use quarry_rs::pipeline::Criterion;
use quarry_rs::testing::{HashEmbedder, RecordingMirror, ScriptedLlm};
use quarry_rs::types::WorkflowConfig;
use quarry_rs::WorkflowEngine;
use serde_json::json;
use uuid::Uuid;

pub const EXTRACTION: &str = "concept_extraction";
pub const DEDUPE: &str = "duplicate_judgement";
pub const RELATIONS: &str = "relation_suggestions";
pub const ASSESSMENT: &str = "quality_assessment";

pub const A_TITLE: &str = "Dichotomy of control";
pub const A_BODY: &str = "Some things are up to us and others are not. Only our judgements are fully ours.";
pub const B_TITLE: &str = "Virtue as the sole good";
pub const B_BODY: &str = "Virtue is the only thing that is good without qualification.";
pub const X_TITLE: &str = "Virtue";

pub fn sources() -> Vec<SourceUnit> {
    vec![
        SourceUnit::new("q1", "Some things are within our power, while others are not.")
            .with_attribution("Epictetus"),
        SourceUnit::new("q2", "Within our power are opinion, motivation, desire, aversion.")
            .with_attribution("Epictetus"),
        SourceUnit::new("q3", "Virtue is the sole good.").with_attribution("Zeno"),
    ]
}

pub fn config() -> WorkflowConfig {
    WorkflowConfig {
        max_refinement_iterations: 3,
        max_review_iterations: 2,
        relation_similarity_floor: 0.0,
        retry: RetryPolicy {
            call_timeout_ms: 200,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            max_attempts: 2,
        },
        ..WorkflowConfig::default()
    }
}

pub fn embedding_text(title: &str, body: &str) -> String {
    format!("{title}\n\n{body}")
}

/// Graph seeded with X, plus an embedder that puts A far from X and B on
/// top of it.
pub fn seeded_graph() -> (InMemoryDriver, HashEmbedder, Uuid) {
    let embedder = HashEmbedder::new(64);
    embedder.pin(embedding_text(A_TITLE, A_BODY), embedder.axis(0));
    embedder.pin(embedding_text(B_TITLE, B_BODY), embedder.axis(1));

    let driver = InMemoryDriver::new();
    let x = Uuid::new_v4();
    driver.insert_concept(ConceptNode {
        id: x,
        title: X_TITLE.to_string(),
        short_summary: "The only good.".to_string(),
        long_summary: "The only good; everything else is indifferent.".to_string(),
        embedding: embedder.axis(1),
        created_at: Utc::now(),
        run_id: None,
    });
    (driver, embedder, x)
}

pub fn extraction_output() -> serde_json::Value {
    json!({
        "concepts": [
            { "title": A_TITLE, "body": A_BODY, "rationale": "Opening distinction", "source_ids": ["q1", "q2"] },
            { "title": B_TITLE, "body": B_BODY, "rationale": "Ethical core", "source_ids": ["q3"] }
        ],
        "unattributed": []
    })
}

pub fn assessment(passed: bool) -> serde_json::Value {
    let criteria: Vec<_> = Criterion::ALL
        .into_iter()
        .map(|c| {
            let fails = !passed && c == Criterion::Atomicity;
            json!({
                "criterion": c.as_str(),
                "passed": !fails,
                "issues": if fails { vec!["'Dichotomy of control' bundles two ideas"] } else { vec![] },
            })
        })
        .collect();
    json!({ "criteria": criteria, "summary": if passed { "acceptable" } else { "needs work" } })
}

/// Script every stage for the standard scenario.
pub fn scripted_llm(x: Uuid) -> ScriptedLlm {
    let llm = ScriptedLlm::new();
    llm.respond(EXTRACTION, extraction_output());
    llm.on(DEDUPE, move |payload| {
        let judgement = if payload.contains(B_TITLE) {
            json!({ "is_duplicate": true, "matched_node_id": x.to_string(), "confidence": 0.9, "reasoning": "same claim" })
        } else {
            json!({ "is_duplicate": false, "confidence": 0.8, "reasoning": "different idea" })
        };
        Ok(judgement.to_string())
    });
    llm.respond(
        RELATIONS,
        json!({
            "relations": [{
                "target_id": x.to_string(),
                "kind": "PART_OF",
                "explanation": "Knowing what is up to us is part of living virtuously",
                "confidence": 0.8
            }]
        }),
    );
    llm.respond(ASSESSMENT, assessment(true));
    llm
}

pub type Engine<G, C> = WorkflowEngine<ScriptedLlm, HashEmbedder, G, RecordingMirror, C>;

pub fn engine<G: GraphDriver, C: CheckpointStore>(
    llm: &ScriptedLlm,
    embedder: &HashEmbedder,
    driver: G,
    mirror: &RecordingMirror,
    store: C,
    config: WorkflowConfig,
) -> Engine<G, C> {
    quarry_rs::testing::init_tracing();
    WorkflowEngine::new(llm.clone(), embedder.clone(), driver, mirror.clone(), store, config)
        .expect("valid config")
}
