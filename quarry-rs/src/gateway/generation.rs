//! Structured generation gateway.
//!
//! Every LLM call of the workflow goes through [`StructuredGateway::request`]:
//! the raw response is never trusted. It is parsed, deserialized into the
//! expected [`OutputContract`] and validated here, so a non-conforming answer
//! surfaces as [`GenerationFailure::MalformedOutput`] instead of leaking into
//! workflow state.

use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use validator::Validate;

use crate::errors::GenerationFailure;
use crate::llm_client::{LlmClient, Message, OutputShape};
use crate::utils::extract_json_from_response;

use super::{with_retry, RetryPolicy};

/// A type the model is asked to produce.
pub trait OutputContract: DeserializeOwned + schemars::JsonSchema + Validate {
    /// Shape name sent with the schema; also keys scripted test responses.
    const SHAPE: &'static str;

    /// Cross-field checks `validator` cannot express.
    fn check(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    fn output_shape() -> OutputShape {
        OutputShape::of::<Self>(Self::SHAPE)
    }
}

/// Role instructions plus task payload.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub instructions: String,
    pub payload: String,
}

impl GenerationRequest {
    pub fn new(instructions: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            payload: payload.into(),
        }
    }

    fn messages(&self) -> [Message; 2] {
        [
            Message::system(self.instructions.as_str()),
            Message::user(self.payload.as_str()),
        ]
    }
}

/// Wraps an [`LlmClient`] with timeouts, retries and output validation.
pub struct StructuredGateway<L> {
    llm: L,
    policy: RetryPolicy,
}

impl<L: LlmClient> StructuredGateway<L> {
    pub fn new(llm: L, policy: RetryPolicy) -> Self {
        Self { llm, policy }
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    /// Ask for a `T`, returning the validated value or a typed failure.
    pub async fn request<T: OutputContract>(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<T, GenerationFailure> {
        let shape = T::output_shape();
        let messages = request.messages();

        let raw = with_retry(&self.policy, T::SHAPE, || {
            self.llm.generate_json(&messages, &shape)
        })
        .await
        .map_err(|e| {
            warn!(shape = T::SHAPE, error = %e, "generation failed");
            GenerationFailure::from(e)
        })?;

        let parsed = parse_output::<T>(&raw);
        if let Err(failure) = &parsed {
            debug!(shape = T::SHAPE, %failure, "rejected model output");
        }
        parsed
    }
}

/// Parse raw model text into a validated `T`.
pub fn parse_output<T: OutputContract>(raw: &str) -> std::result::Result<T, GenerationFailure> {
    let json = extract_json_from_response(raw).ok_or_else(|| {
        GenerationFailure::MalformedOutput(format!("no JSON found in {} response", T::SHAPE))
    })?;
    let value: T = serde_json::from_str(json)
        .map_err(|e| GenerationFailure::MalformedOutput(format!("{}: {e}", T::SHAPE)))?;
    value
        .validate()
        .map_err(|e| GenerationFailure::MalformedOutput(format!("{}: {e}", T::SHAPE)))?;
    value.check().map_err(GenerationFailure::MalformedOutput)?;
    Ok(value)
}
