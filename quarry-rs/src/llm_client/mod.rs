//! LLM client abstraction.
//!
//! The generation service is a black box: it receives chat messages plus the
//! expected output shape and returns raw text. Parsing and shape validation
//! happen in [`crate::gateway::StructuredGateway`], never here.
//!
//! # Implementations
//! - [`openai::OpenAiClient`]: OpenAI chat completions via `async-openai`.
//! - `testing::ScriptedLlm` (feature `testing`): scripted responses for tests.

pub mod openai;

use schemars::JsonSchema;
use serde::Serialize;

use crate::errors::Result;

/// A chat message for the LLM conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Speaker role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Expected output shape of a structured request: a name plus JSON schema.
#[derive(Debug, Clone)]
pub struct OutputShape {
    pub name: &'static str,
    pub schema: serde_json::Value,
}

impl OutputShape {
    /// Shape derived from `T`'s `schemars` schema.
    pub fn of<T: JsonSchema>(name: &'static str) -> Self {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
        Self { name, schema }
    }
}

/// Trait for LLM clients.
#[allow(async_fn_in_trait)]
pub trait LlmClient: Send + Sync {
    /// Send a request and return the response as plain text.
    async fn generate(&self, messages: &[Message]) -> Result<String>;

    /// Send a request constrained to `shape` and return the raw response text.
    ///
    /// Implementations may use the schema to constrain decoding, but callers
    /// must not assume the text conforms to it.
    async fn generate_json(&self, messages: &[Message], shape: &OutputShape) -> Result<String>;
}
