//! Configuration types.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::gateway::RetryPolicy;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuarryConfig {
    /// Neo4j connection URI (e.g. `bolt://localhost:7687`).
    #[validate(length(min = 1))]
    pub neo4j_uri: String,

    pub neo4j_user: String,

    #[validate(length(min = 1))]
    pub neo4j_password: String,

    #[validate(length(min = 1))]
    pub openai_api_key: String,

    /// Embedding vector dimension (must be > 0).
    #[validate(range(min = 1))]
    pub embedding_dim: usize,

    /// Generation model name.
    pub model_name: String,

    pub embedding_model: String,

    /// Directory of the filesystem checkpoint store.
    #[validate(length(min = 1))]
    pub checkpoint_dir: String,

    #[validate(nested)]
    pub workflow: WorkflowConfig,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self {
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: String::new(),
            openai_api_key: String::new(),
            embedding_dim: 1536,
            model_name: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            checkpoint_dir: "./checkpoints".to_string(),
            workflow: WorkflowConfig::default(),
        }
    }
}

impl QuarryConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` first, so a missing `.env` is fine.
    /// `NEO4J_PASSWORD` and `OPENAI_API_KEY` are required; workflow tuning
    /// comes from [`WorkflowConfig::from_env`].
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let neo4j_password = std::env::var("NEO4J_PASSWORD").map_err(|_| {
            crate::QuarryError::Validation("NEO4J_PASSWORD is required".to_string())
        })?;

        let openai_api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            crate::QuarryError::Validation("OPENAI_API_KEY is required".to_string())
        })?;

        let config = Self {
            neo4j_uri: std::env::var("NEO4J_URI").unwrap_or(defaults.neo4j_uri),
            neo4j_user: std::env::var("NEO4J_USER").unwrap_or(defaults.neo4j_user),
            neo4j_password,
            openai_api_key,
            embedding_dim: env_parse("EMBEDDING_DIM", defaults.embedding_dim)?,
            model_name: std::env::var("MODEL_NAME").unwrap_or(defaults.model_name),
            embedding_model: std::env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            checkpoint_dir: std::env::var("CHECKPOINT_DIR").unwrap_or(defaults.checkpoint_dir),
            workflow: WorkflowConfig::from_env()?,
        };

        config
            .validate()
            .map_err(|e| crate::QuarryError::Validation(e.to_string()))?;

        Ok(config)
    }
}

/// Tuning knobs of the extraction-curation workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WorkflowConfig {
    /// Automatic refinement passes before handing over to review.
    #[validate(range(max = 100))]
    pub max_refinement_iterations: u32,

    /// Feedback passes before an unresolved review aborts the run.
    #[validate(range(min = 1, max = 200))]
    pub max_review_iterations: u32,

    /// Neighbours fetched per candidate during deduplication.
    #[validate(range(min = 1, max = 500))]
    pub dedup_top_k: usize,

    #[validate(range(min = 0.0, max = 1.0))]
    pub dedup_similarity_floor: f32,

    /// Minimum judged confidence for a candidate to count as a duplicate.
    #[validate(range(min = 0.0, max = 1.0))]
    pub duplicate_confidence_threshold: f64,

    /// Similarity queries issued per relation kind.
    #[validate(range(min = 2, max = 8))]
    pub relation_queries_per_kind: usize,

    #[validate(range(min = 1, max = 100))]
    pub relation_top_k: usize,

    #[validate(range(min = 0.0, max = 1.0))]
    pub relation_similarity_floor: f32,

    #[validate(range(min = 0.0, max = 1.0))]
    pub min_relation_confidence: f64,

    /// Branches of one superstep in flight at once.
    #[validate(range(min = 1, max = 256))]
    pub max_concurrency: usize,

    /// Attempts per commit step before the run aborts.
    #[validate(range(min = 1, max = 20))]
    pub commit_max_attempts: u32,

    #[validate(nested)]
    pub retry: RetryPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_refinement_iterations: 10,
            max_review_iterations: 20,
            dedup_top_k: 50,
            dedup_similarity_floor: 0.55,
            duplicate_confidence_threshold: 0.7,
            relation_queries_per_kind: 2,
            relation_top_k: 8,
            relation_similarity_floor: 0.5,
            min_relation_confidence: 0.4,
            max_concurrency: 8,
            commit_max_attempts: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkflowConfig {
    /// Defaults overridden by `QUARRY_*` environment variables.
    pub fn from_env() -> crate::Result<Self> {
        let d = Self::default();
        let config = Self {
            max_refinement_iterations: env_parse(
                "QUARRY_MAX_REFINEMENT_ITERATIONS",
                d.max_refinement_iterations,
            )?,
            max_review_iterations: env_parse("QUARRY_MAX_REVIEW_ITERATIONS", d.max_review_iterations)?,
            dedup_top_k: env_parse("QUARRY_DEDUP_TOP_K", d.dedup_top_k)?,
            dedup_similarity_floor: env_parse("QUARRY_DEDUP_SIMILARITY_FLOOR", d.dedup_similarity_floor)?,
            duplicate_confidence_threshold: env_parse(
                "QUARRY_DUPLICATE_CONFIDENCE_THRESHOLD",
                d.duplicate_confidence_threshold,
            )?,
            relation_queries_per_kind: env_parse(
                "QUARRY_RELATION_QUERIES_PER_KIND",
                d.relation_queries_per_kind,
            )?,
            relation_top_k: env_parse("QUARRY_RELATION_TOP_K", d.relation_top_k)?,
            relation_similarity_floor: env_parse(
                "QUARRY_RELATION_SIMILARITY_FLOOR",
                d.relation_similarity_floor,
            )?,
            min_relation_confidence: env_parse("QUARRY_MIN_RELATION_CONFIDENCE", d.min_relation_confidence)?,
            max_concurrency: env_parse("QUARRY_MAX_CONCURRENCY", d.max_concurrency)?,
            commit_max_attempts: env_parse("QUARRY_COMMIT_MAX_ATTEMPTS", d.commit_max_attempts)?,
            retry: RetryPolicy {
                call_timeout_ms: env_parse("QUARRY_CALL_TIMEOUT_MS", d.retry.call_timeout_ms)?,
                max_attempts: env_parse("QUARRY_CALL_MAX_ATTEMPTS", d.retry.max_attempts)?,
                ..d.retry
            },
        };
        config
            .validate()
            .map_err(|e| crate::QuarryError::Validation(e.to_string()))?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> crate::Result<T> {
    match std::env::var(name) {
        Ok(val) => val.trim().parse::<T>().map_err(|_| {
            crate::QuarryError::Validation(format!("{name} has an invalid value: {val}"))
        }),
        Err(_) => Ok(default),
    }
}
