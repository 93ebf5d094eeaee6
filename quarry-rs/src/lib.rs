//! # quarry-rs
//!
//! Iterative concept extraction and curation over a knowledge graph of
//! atomic concepts backed by quotation evidence.
//!
//! ## Architecture
//!
//! - **Extraction loop**: extract candidate concepts from a batch of source
//!   fragments, deduplicate them against the graph, derive typed relations,
//!   and refine until a quality gate passes or the iteration bound is hit
//! - **Human review**: the run suspends to a durable checkpoint and resumes
//!   on approval or free-text feedback
//! - **Commit**: novel concepts, both directions of every relation and all
//!   evidence links are written idempotently, then mirrored to markdown
//! - **Supersteps**: per-candidate branches run concurrently behind a barrier

pub mod edges;
pub mod errors;
pub mod nodes;
pub mod types;

pub mod checkpoint;
pub mod driver;
pub mod embedder;
pub mod gateway;
pub mod llm_client;
pub mod mirror;

pub mod pipeline;
pub mod prompts;
pub mod utils;
pub mod workflow;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use errors::{QuarryError, Result};
pub use workflow::{ReviewDecision, WorkflowEngine, WorkflowOutcome};
