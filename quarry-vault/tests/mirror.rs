mod helpers;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use helpers::{concept, TempVault, CONCEPT_DIR};
use quarry_rs::checkpoint::MemoryCheckpointStore;
use quarry_rs::driver::InMemoryDriver;
use quarry_rs::edges::RelationKind;
use quarry_rs::gateway::RetryPolicy;
use quarry_rs::errors::MirrorError;
use quarry_rs::mirror::{ConceptMirror, MirrorLink, MirrorReceipt, MirrorWriter, TitleResolver};
use quarry_rs::nodes::{ConceptNode, SourceUnit};
use quarry_rs::pipeline::{CommitSummary, Criterion};
use quarry_rs::testing::{HashEmbedder, ScriptedLlm};
use quarry_rs::types::WorkflowConfig;
use quarry_rs::{ReviewDecision, WorkflowEngine, WorkflowOutcome};
use quarry_vault::note::parse_note_id;
use quarry_vault::VaultMirror;

async fn write_bare(
    mirror: &VaultMirror,
    node: &ConceptNode,
) -> Result<MirrorReceipt, MirrorError> {
    let titles = TitleResolver::new();
    mirror
        .write_concept(&ConceptMirror {
            node,
            outgoing: vec![],
            incoming: vec![],
            evidence: vec![],
            titles: &titles,
        })
        .await
}

#[tokio::test]
async fn writes_note_with_links_and_evidence() {
    let vault = TempVault::new();
    let mirror = vault.mirror();

    let node = concept("Dichotomy of control");
    let virtue = Uuid::new_v4();
    let mut titles = TitleResolver::new();
    titles.insert(virtue, "Virtue");
    let quote = SourceUnit::new("q1", "Some things are within our power.").with_attribution("Epictetus");

    let receipt = mirror
        .write_concept(&ConceptMirror {
            node: &node,
            outgoing: vec![MirrorLink { kind: RelationKind::PartOf, node_id: virtue }],
            incoming: vec![MirrorLink { kind: RelationKind::HasPart, node_id: virtue }],
            evidence: vec![&quote],
            titles: &titles,
        })
        .await
        .unwrap();

    assert_eq!(receipt.node_id, node.id);
    assert_eq!(receipt.location, "Concepts/Dichotomy of control.md");

    let note = vault.read(&receipt.location);
    assert_eq!(parse_note_id(&note), Some(node.id));
    assert!(note.contains("- **PART_OF** [[Virtue]]\n"));
    assert!(note.contains("- [[Virtue]] **HAS_PART**\n"));
    assert!(note.contains("> Some things are within our power.\n> (by Epictetus, `q1`)\n"));
}

#[tokio::test]
async fn replaying_a_write_overwrites_the_same_note() {
    let vault = TempVault::new();
    let mirror = vault.mirror();
    let node = concept("Virtue");

    write_bare(&mirror, &node).await.unwrap();
    write_bare(&mirror, &node).await.unwrap();

    assert_eq!(mirror.list_notes().await.unwrap(), vec!["Virtue.md"]);
}

#[tokio::test]
async fn note_owned_by_another_concept_is_not_clobbered() {
    let vault = TempVault::new();
    let mirror = vault.mirror();

    let first = concept("Virtue");
    write_bare(&mirror, &first).await.unwrap();

    let second = concept("Virtue");
    let err = write_bare(&mirror, &second).await.unwrap_err();
    assert_eq!(err.node_id, second.id);
    assert!(err.reason.contains(&first.id.to_string()));
    assert_eq!(parse_note_id(&vault.read("Concepts/Virtue.md")), Some(first.id));
}

#[tokio::test]
async fn hand_written_note_without_id_is_preserved() {
    let vault = TempVault::new();
    vault.write("Concepts/Virtue.md", "# Virtue\n\nmy scratch notes\n");
    let mirror = vault.mirror();
    let node = concept("Virtue");

    let err = write_bare(&mirror, &node).await.unwrap_err();
    assert_eq!(err.node_id, node.id);
    assert!(err.reason.contains("not written by the mirror"));
    assert_eq!(vault.read("Concepts/Virtue.md"), "# Virtue\n\nmy scratch notes\n");
}

#[tokio::test]
async fn from_config_rejects_missing_vault() {
    let vault = TempVault::new();
    let mut config = vault.config();
    config.vault_path = vault.path.join("missing");
    assert!(VaultMirror::from_config(config).await.is_err());

    let mirror = VaultMirror::from_config(vault.config()).await.unwrap();
    assert_eq!(mirror.note_path("Virtue"), format!("{CONCEPT_DIR}/Virtue.md"));
}

fn assessment() -> serde_json::Value {
    let criteria: Vec<_> = Criterion::ALL
        .into_iter()
        .map(|c| json!({ "criterion": c.as_str(), "passed": true, "issues": [] }))
        .collect();
    json!({ "criteria": criteria, "summary": "acceptable" })
}

/// Run one quote about the dichotomy of control through the engine and
/// approve it, mirroring into `vault`.
async fn approved_run(vault: &TempVault) -> (InMemoryDriver, CommitSummary) {
    quarry_rs::testing::init_tracing();
    let mirror = VaultMirror::from_config(vault.config()).await.unwrap();

    let embedder = HashEmbedder::new(32);
    let driver = InMemoryDriver::new();
    let x = Uuid::new_v4();
    driver.insert_concept(ConceptNode {
        id: x,
        title: "Virtue".to_string(),
        short_summary: "The only good.".to_string(),
        long_summary: "The only good.".to_string(),
        embedding: embedder.axis(1),
        created_at: Utc::now(),
        run_id: None,
    });

    let llm = ScriptedLlm::new();
    llm.respond(
        "concept_extraction",
        json!({
            "concepts": [{
                "title": "Dichotomy of control",
                "body": "Some things are up to us and others are not.",
                "rationale": "Opening distinction",
                "source_ids": ["q1"]
            }],
            "unattributed": []
        }),
    );
    llm.respond(
        "duplicate_judgement",
        json!({ "is_duplicate": false, "confidence": 0.8, "reasoning": "different idea" }),
    );
    llm.respond(
        "relation_suggestions",
        json!({
            "relations": [{
                "target_id": x.to_string(),
                "kind": "PART_OF",
                "explanation": "Part of living virtuously",
                "confidence": 0.8
            }]
        }),
    );
    llm.respond("quality_assessment", assessment());

    let config = WorkflowConfig {
        relation_similarity_floor: 0.0,
        retry: RetryPolicy {
            call_timeout_ms: 200,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            max_attempts: 2,
        },
        ..WorkflowConfig::default()
    };
    let engine = WorkflowEngine::new(
        llm,
        embedder,
        driver.clone(),
        mirror.clone(),
        MemoryCheckpointStore::new(),
        config,
    )
    .unwrap();

    let sources = vec![SourceUnit::new("q1", "Some things are within our power, while others are not.")
        .with_attribution("Epictetus")];
    let outcome = engine.start("vault-run", sources, None).await.unwrap();
    let WorkflowOutcome::AwaitingReview { handle, .. } = outcome else {
        panic!("expected review, got {outcome:?}");
    };
    let outcome = engine.resume(&handle, ReviewDecision::Approve).await.unwrap();
    let WorkflowOutcome::Committed { summary, .. } = outcome else {
        panic!("expected commit, got {outcome:?}");
    };
    (driver, summary)
}

#[tokio::test]
async fn approved_run_lands_in_the_vault() {
    let vault = TempVault::new();
    let (driver, summary) = approved_run(&vault).await;
    assert!(summary.mirror_pending.is_empty());

    let a = driver.find_by_title("Dichotomy of control").expect("committed");
    let note = vault.read("Concepts/Dichotomy of control.md");
    assert_eq!(parse_note_id(&note), Some(a.id));
    assert!(note.contains("- **PART_OF** [[Virtue]]\n"));
    assert!(note.contains("- [[Virtue]] **HAS_PART**\n"));
    assert!(note.contains("(by Epictetus, `q1`)"));
}

#[tokio::test]
async fn hand_written_note_leaves_the_concept_pending() {
    let vault = TempVault::new();
    vault.write("Concepts/Dichotomy of control.md", "my own take\n");
    let (driver, summary) = approved_run(&vault).await;

    let a = driver.find_by_title("Dichotomy of control").expect("committed");
    assert_eq!(summary.mirror_pending, vec![a.id]);
    assert_eq!(vault.read("Concepts/Dichotomy of control.md"), "my own take\n");
}
