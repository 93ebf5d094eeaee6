//! Edge types for the concept graph.
//!
//! - [`RelationKind`]: the closed 9-kind relation algebra
//! - [`RelationProposal`]: a run-scoped typed edge between candidate and/or existing concepts
//! - [`ConceptEdge`]: a resolved, committed typed edge
//! - [`EvidenceLink`]: SUPPORTS link from a source fragment to a concept

pub mod evidence;
pub mod relation;

pub use evidence::EvidenceLink;
pub use relation::{ConceptEdge, RelationEndpoint, RelationKind, RelationProposal};
