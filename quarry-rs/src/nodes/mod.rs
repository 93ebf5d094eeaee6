//! Node types for the concept graph.
//!
//! - [`SourceUnit`]: an immutable quotation fragment fed into a run
//! - [`CandidateConcept`]: a run-scoped concept proposal, keyed by [`TempId`]
//! - [`ConceptNode`]: a committed concept in the graph store

pub mod candidate;
pub mod concept;
pub mod source;

pub use candidate::{CandidateConcept, TempId};
pub use concept::ConceptNode;
pub use source::{SourceUnit, SourceUnitId};
