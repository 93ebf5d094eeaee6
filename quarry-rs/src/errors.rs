//! Error types for quarry-rs.

use std::time::Duration;

use uuid::Uuid;

/// Alias for Results returning [`QuarryError`].
pub type Result<T> = std::result::Result<T, QuarryError>;

/// Top-level error type for quarry-rs.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    #[error("Driver error: {0}")]
    Driver(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedder error: {0}")]
    Embedder(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl QuarryError {
    /// Whether a retry of the same call may succeed.
    ///
    /// Graph driver errors count as transient: a store that stays down is
    /// caught by the bounded attempt count and becomes fatal one level up.
    pub fn is_transient(&self) -> bool {
        match self {
            QuarryError::Timeout(_) | QuarryError::Transport(_) | QuarryError::Driver(_) => true,
            QuarryError::Llm(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// LLM-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited")]
    RateLimit,

    #[error("Model refused to respond")]
    Refusal,

    #[error("Empty response from LLM")]
    EmptyResponse,

    #[error("Authentication failed")]
    Authentication,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("API error ({}): {message}", .code.as_deref().unwrap_or("unknown"))]
    Api {
        code: Option<String>,
        message: String,
    },
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::RateLimit | LlmError::Transport(_))
    }
}

/// Typed failure of a structured-generation request.
///
/// Stages receive this instead of [`QuarryError`]: a failed generation is a
/// per-branch outcome, never an error that crosses a stage boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationFailure {
    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("model refused the request")]
    Refused,

    #[error("generation service unavailable: {0}")]
    Unavailable(String),
}

impl From<QuarryError> for GenerationFailure {
    fn from(err: QuarryError) -> Self {
        match err {
            QuarryError::Timeout(d) => GenerationFailure::Timeout(d),
            QuarryError::Llm(LlmError::Refusal) => GenerationFailure::Refused,
            QuarryError::Llm(LlmError::EmptyResponse) => {
                GenerationFailure::MalformedOutput("empty response".to_string())
            }
            QuarryError::Serialization(e) => GenerationFailure::MalformedOutput(e.to_string()),
            QuarryError::Validation(msg) => GenerationFailure::MalformedOutput(msg),
            other => GenerationFailure::Unavailable(other.to_string()),
        }
    }
}

/// The `mirror-write-failed` signal.
///
/// Returned by [`crate::mirror::MirrorWriter`]; the commit stage turns it into
/// a `mirror_pending` flag instead of failing the commit.
#[derive(Debug, Clone, thiserror::Error)]
#[error("mirror write failed for {node_id}: {reason}")]
pub struct MirrorError {
    pub node_id: Uuid,
    pub reason: String,
}

impl MirrorError {
    pub fn new(node_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            node_id,
            reason: reason.into(),
        }
    }
}
