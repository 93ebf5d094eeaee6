//! Extraction-curation pipeline stages.
//!
//! The stages in workflow order:
//! 1. **Extract**: the model proposes candidate concepts from the batch
//! 2. **Deduplicate**: per candidate: embed → nearest nodes → judged
//!    equivalence; one superstep over all unjudged candidates
//! 3. **Derive relations**: per novel concept: kind-targeted similarity
//!    queries build a pool, the model proposes typed edges into it
//! 4. **Assess**: deterministic pre-checks plus the rubric quality gate
//! 5. **Refine**: critique or reviewer feedback → revised candidate set
//! 6. **Commit**: nodes, both directions of every edge, evidence, mirror
//!
//! Stages return their results; only [`crate::workflow`] mutates state.

pub mod assess;
pub mod commit;
pub mod dedupe;
pub mod extract;
pub mod refine;
pub mod relations;
pub mod superstep;

pub use assess::{Criterion, CriterionResult, QualityAssessment};
pub use commit::{CommitPlan, CommitSummary};
pub use dedupe::{DedupeOutcome, DuplicateVerdict};
pub use extract::ExtractionResult;
pub use relations::RelationBranch;
