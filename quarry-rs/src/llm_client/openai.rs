//! OpenAI LLM client implementation.
//!
//! Uses `async-openai` for API calls and `moka` for response caching. A call
//! is a single attempt: timeouts and retries belong to
//! [`crate::gateway::with_retry`], so errors are only classified here.

use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use moka::future::Cache;
use serde_json::json;
use tracing::debug;

use crate::errors::{LlmError, QuarryError, Result};

use super::{LlmClient, Message, OutputShape};

/// Configuration for the in-process response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_capacity: u64,
    /// How long each entry lives before eviction.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1_000,
            ttl: Duration::from_secs(3_600),
        }
    }
}

/// OpenAI LLM client implementing [`LlmClient`].
pub struct OpenAiClient {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    /// Keyed by `md5(prefix + model + messages)` → response text.
    cache: Cache<String, String>,
}

impl OpenAiClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_key` – OpenAI secret key.
    /// * `model`   – Model name (e.g. `"gpt-4o"`).
    /// * `cache_config` – Cache capacity and TTL.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        cache_config: CacheConfig,
    ) -> Self {
        let config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
        Self::with_config(config, model, cache_config)
    }

    fn with_config(
        config: async_openai::config::OpenAIConfig,
        model: impl Into<String>,
        cache_config: CacheConfig,
    ) -> Self {
        // The library retries rate limits on its own by default; disable that so
        // the gateway policy is the only retry loop.
        let single_attempt = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();
        let client = async_openai::Client::with_config(config).with_backoff(single_attempt);

        let cache = Cache::builder()
            .max_capacity(cache_config.max_capacity)
            .time_to_live(cache_config.ttl)
            .build();

        Self {
            client,
            model: model.into(),
            temperature: 0.0,
            max_tokens: 8_192,
            cache,
        }
    }

    /// Override the sampling temperature (default `0.0`).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the max output token limit (default `8192`).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn cache_key(&self, prefix: &str, messages: &[Message]) -> String {
        use md5::{Digest, Md5};
        let mut h = Md5::new();
        h.update(prefix.as_bytes());
        h.update(self.model.as_bytes());
        for m in messages {
            h.update(m.role.as_str().as_bytes());
            h.update(m.content.as_bytes());
        }
        format!("{:x}", h.finalize())
    }

    fn messages_to_json(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect()
    }

    async fn call(&self, request: serde_json::Value) -> Result<serde_json::Value> {
        let outcome: std::result::Result<serde_json::Value, async_openai::error::OpenAIError> =
            self.client.chat().create_byot(request).await;
        outcome.map_err(|e| QuarryError::Llm(map_openai_error(e)))
    }

    /// Extract the assistant message text from a chat-completions response.
    fn extract_content(response: &serde_json::Value) -> Result<String> {
        let message = &response["choices"][0]["message"];
        if message["refusal"].as_str().is_some_and(|r| !r.is_empty()) {
            return Err(QuarryError::Llm(LlmError::Refusal));
        }
        match message["content"].as_str() {
            Some(content) if !content.trim().is_empty() => Ok(content.to_owned()),
            _ => Err(QuarryError::Llm(LlmError::EmptyResponse)),
        }
    }

    async fn cached_call(&self, key: String, request: serde_json::Value) -> Result<String> {
        if let Some(cached) = self.cache.get(&key).await {
            debug!("LLM cache hit");
            return Ok(cached);
        }
        let response = self.call(request).await?;
        let content = Self::extract_content(&response)?;
        self.cache.insert(key, content.clone()).await;
        Ok(content)
    }
}

impl LlmClient for OpenAiClient {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        let key = self.cache_key("text", messages);
        let request = json!({
            "model": self.model,
            "messages": Self::messages_to_json(messages),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        self.cached_call(key, request).await
    }

    async fn generate_json(&self, messages: &[Message], shape: &OutputShape) -> Result<String> {
        // Same messages under different shapes must not collide.
        let key = self.cache_key(shape.name, messages);
        let request = json!({
            "model": self.model,
            "messages": Self::messages_to_json(messages),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": shape.name,
                    "schema": shape.schema,
                }
            }
        });
        self.cached_call(key, request).await
    }
}

/// Map an [`async_openai::error::OpenAIError`] to our [`LlmError`] domain type.
fn map_openai_error(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;

    match err {
        OpenAIError::ApiError(api_err) => match api_err.code.as_deref() {
            Some("invalid_api_key") | Some("invalid_organization") => LlmError::Authentication,
            Some("rate_limit_exceeded") => LlmError::RateLimit,
            _ if api_err.r#type.as_deref() == Some("server_error") => {
                LlmError::Transport(api_err.message)
            }
            _ => LlmError::Api {
                code: api_err.code,
                message: api_err.message,
            },
        },
        OpenAIError::Reqwest(e) => LlmError::Transport(e.to_string()),
        other => LlmError::Api {
            code: None,
            message: other.to_string(),
        },
    }
}
