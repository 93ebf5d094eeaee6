//! Test doubles for the engine's external services.
//!
//! Everything here is deterministic and in-process, so workflow tests need
//! no network, model, or database. Doubles are `Clone` and share state
//! across clones: hand one clone to the engine and keep another to script
//! or inspect it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use md5::{Digest, Md5};
use uuid::Uuid;

use crate::driver::{GraphDriver, ScoredConcept, SimilarityQuery};
use crate::edges::{ConceptEdge, EvidenceLink};
use crate::embedder::{EmbedderClient, Embedding};
use crate::errors::{LlmError, MirrorError, QuarryError, Result};
use crate::llm_client::{LlmClient, Message, OutputShape, Role};
use crate::mirror::{ConceptMirror, MirrorReceipt, MirrorWriter};
use crate::nodes::{ConceptNode, SourceUnit};
use crate::utils::normalize_l2;

/// Install a `tracing` subscriber writing through the test harness.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quarry_rs=debug")),
        )
        .with_test_writer()
        .try_init();
}

type Handler = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// An [`LlmClient`] answering structured requests from closures keyed by
/// output-shape name.
///
/// Each handler receives the user payload of the request. An unscripted
/// shape fails with a permanent API error.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    inner: Arc<ScriptedInner>,
}

#[derive(Default)]
struct ScriptedInner {
    handlers: DashMap<String, Handler>,
    stalls: DashMap<String, Duration>,
    calls: DashMap<String, Vec<String>>,
}

impl std::fmt::Debug for ScriptedLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shapes: BTreeSet<String> = self.inner.handlers.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("ScriptedLlm").field("shapes", &shapes).finish()
    }
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `shape` with `handler`, replacing any earlier script.
    pub fn on<F>(&self, shape: &str, handler: F) -> &Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.inner.handlers.insert(shape.to_string(), Arc::new(handler));
        self
    }

    /// Answer `shape` with a fixed JSON value.
    pub fn respond(&self, shape: &str, value: serde_json::Value) -> &Self {
        let body = value.to_string();
        self.on(shape, move |_| Ok(body.clone()))
    }

    /// Sleep `delay` before answering `shape`.
    pub fn stall_on(&self, shape: &str, delay: Duration) -> &Self {
        self.inner.stalls.insert(shape.to_string(), delay);
        self
    }

    pub fn clear_stall(&self, shape: &str) -> &Self {
        self.inner.stalls.remove(shape);
        self
    }

    /// Number of requests made for `shape`, stalled ones included.
    pub fn calls(&self, shape: &str) -> usize {
        self.inner.calls.get(shape).map_or(0, |c| c.len())
    }

    /// User payloads sent for `shape`, in call order.
    pub fn payloads(&self, shape: &str) -> Vec<String> {
        self.inner
            .calls
            .get(shape)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }

    async fn answer(&self, shape: &str, messages: &[Message]) -> Result<String> {
        let payload = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.inner
            .calls
            .entry(shape.to_string())
            .or_default()
            .push(payload.clone());

        let stall = self.inner.stalls.get(shape).map(|d| *d.value());
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let handler = self.inner.handlers.get(shape).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => handler(&payload),
            None => Err(LlmError::Api {
                code: Some("unscripted".to_string()),
                message: format!("no script for shape '{shape}'"),
            }
            .into()),
        }
    }
}

impl LlmClient for ScriptedLlm {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        self.answer("text", messages).await
    }

    async fn generate_json(&self, messages: &[Message], shape: &OutputShape) -> Result<String> {
        self.answer(shape.name, messages).await
    }
}

/// Deterministic bag-of-words embedder.
///
/// Every lowercase word is hashed with MD5 into one signed bucket, and the
/// sum is L2-normalized: texts sharing words are similar, texts sharing
/// none are close to orthogonal. Exact vectors can be pinned per text.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    inner: Arc<HashInner>,
}

#[derive(Debug, Default)]
struct HashInner {
    pinned: DashMap<String, Embedding>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            inner: Arc::default(),
        }
    }

    /// Return `embedding` whenever exactly `text` is embedded.
    pub fn pin(&self, text: impl Into<String>, embedding: Embedding) -> &Self {
        self.inner.pinned.insert(text.into(), embedding);
        self
    }

    /// Make every call fail with a permanent embedder error.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Unit vector along `axis`, for pinning.
    pub fn axis(&self, axis: usize) -> Embedding {
        let mut v = vec![0.0; self.dim];
        v[axis % self.dim] = 1.0;
        v
    }

    fn vector(&self, text: &str) -> Embedding {
        if let Some(pinned) = self.inner.pinned.get(text) {
            return pinned.value().clone();
        }
        let mut v = vec![0.0f32; self.dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Md5::digest(word.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[index] += sign;
        }
        normalize_l2(&v)
    }
}

impl EmbedderClient for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(QuarryError::Embedder("injected embedder failure".to_string()));
        }
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// A [`MirrorWriter`] recording every write; chosen titles fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingMirror {
    inner: Arc<MirrorInner>,
}

#[derive(Debug, Default)]
struct MirrorInner {
    written: Mutex<Vec<MirroredConcept>>,
    failing_titles: DashMap<String, ()>,
}

/// What [`RecordingMirror`] saw for one node.
#[derive(Debug, Clone, PartialEq)]
pub struct MirroredConcept {
    pub node_id: Uuid,
    pub title: String,
    /// `(kind label, resolved title)` of every outgoing link.
    pub outgoing: Vec<(String, String)>,
    pub incoming: Vec<(String, String)>,
    pub evidence: Vec<String>,
}

impl RecordingMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_title(&self, title: impl Into<String>) -> &Self {
        self.inner.failing_titles.insert(title.into(), ());
        self
    }

    pub fn heal(&self) {
        self.inner.failing_titles.clear();
    }

    pub fn written(&self) -> Vec<MirroredConcept> {
        self.inner
            .written
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

impl MirrorWriter for RecordingMirror {
    async fn write_concept(&self, concept: &ConceptMirror<'_>) -> std::result::Result<MirrorReceipt, MirrorError> {
        let node = concept.node;
        if self.inner.failing_titles.contains_key(&node.title) {
            return Err(MirrorError::new(node.id, "injected mirror failure"));
        }
        let resolve = |id: Uuid| {
            concept
                .titles
                .resolve(id)
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string())
        };
        let record = MirroredConcept {
            node_id: node.id,
            title: node.title.clone(),
            outgoing: concept
                .outgoing
                .iter()
                .map(|l| (l.kind.label().to_string(), resolve(l.node_id)))
                .collect(),
            incoming: concept
                .incoming
                .iter()
                .map(|l| (l.kind.label().to_string(), resolve(l.node_id)))
                .collect(),
            evidence: concept.evidence.iter().map(|s| s.id.to_string()).collect(),
        };
        let mut written = self
            .inner
            .written
            .lock()
            .map_err(|_| MirrorError::new(node.id, "recording lock poisoned"))?;
        written.retain(|w| w.node_id != node.id);
        written.push(record);
        Ok(MirrorReceipt {
            node_id: node.id,
            location: format!("memory://{}", node.id),
        })
    }
}

/// A [`GraphDriver`] that fails its first `n` write calls with a transient
/// driver error, then delegates.
#[derive(Debug, Clone)]
pub struct FlakyDriver<G> {
    inner: G,
    remaining_failures: Arc<AtomicUsize>,
    write_calls: Arc<AtomicUsize>,
}

impl<G: GraphDriver> FlakyDriver<G> {
    pub fn new(inner: G, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            write_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    /// Fail the next `n` writes.
    pub fn fail_next(&self, n: usize) {
        self.remaining_failures.store(n, Ordering::SeqCst);
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, what: &str) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(QuarryError::Driver(format!("injected failure during {what}")));
        }
        Ok(())
    }
}

impl<G: GraphDriver> GraphDriver for FlakyDriver<G> {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    async fn create_concept(&self, node: &ConceptNode) -> Result<()> {
        self.maybe_fail("create_concept")?;
        self.inner.create_concept(node).await
    }

    async fn get_concept(&self, id: Uuid) -> Result<Option<ConceptNode>> {
        self.inner.get_concept(id).await
    }

    async fn create_relation(&self, edge: &ConceptEdge) -> Result<()> {
        self.maybe_fail("create_relation")?;
        self.inner.create_relation(edge).await
    }

    async fn create_evidence(&self, source: &SourceUnit, link: &EvidenceLink) -> Result<()> {
        self.maybe_fail("create_evidence")?;
        self.inner.create_evidence(source, link).await
    }

    async fn nearest_concepts(&self, query: &SimilarityQuery) -> Result<Vec<ScoredConcept>> {
        self.inner.nearest_concepts(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::similarity_score;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_word_based() {
        let e = HashEmbedder::new(256);
        let a = e.embed("The obstacle is the way").await.unwrap();
        let b = e.embed("the OBSTACLE is the way").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
        assert!(similarity_score(&a, &b) > 0.99);
    }

    #[tokio::test]
    async fn pinned_vectors_win() {
        let e = HashEmbedder::new(8);
        e.pin("virtue", e.axis(3));
        assert_eq!(e.embed("virtue").await.unwrap(), e.axis(3));
        e.set_failing(true);
        assert!(e.embed("virtue").await.is_err());
    }

    #[tokio::test]
    async fn scripted_llm_records_and_rejects_unscripted_shapes() {
        let llm = ScriptedLlm::new();
        llm.on("echo", |payload| Ok(payload.to_uppercase()));
        let shape = OutputShape {
            name: "echo",
            schema: serde_json::json!({}),
        };
        let out = llm
            .generate_json(&[Message::system("sys"), Message::user("hi")], &shape)
            .await
            .unwrap();
        assert_eq!(out, "HI");
        assert_eq!(llm.payloads("echo"), vec!["hi".to_string()]);

        let other = OutputShape {
            name: "other",
            schema: serde_json::json!({}),
        };
        assert!(llm.generate_json(&[], &other).await.is_err());
    }

    #[tokio::test]
    async fn flaky_driver_fails_then_delegates() {
        let driver = FlakyDriver::new(crate::driver::InMemoryDriver::new(), 1);
        let node = ConceptNode {
            id: Uuid::new_v4(),
            title: "Logos".into(),
            short_summary: String::new(),
            long_summary: String::new(),
            embedding: vec![],
            created_at: chrono::Utc::now(),
            run_id: None,
        };
        let err = driver.create_concept(&node).await.unwrap_err();
        assert!(err.is_transient());
        driver.create_concept(&node).await.unwrap();
        assert_eq!(driver.inner().concept_count(), 1);
        assert_eq!(driver.write_calls(), 2);
    }
}
