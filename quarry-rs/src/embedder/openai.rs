//! OpenAI embedding client.
//!
//! Wraps [`async_openai`] to provide [`EmbedderClient`] for the OpenAI
//! Embeddings API, splitting large batches into API-sized chunks.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig, error::OpenAIError, types::CreateEmbeddingRequestArgs, Client,
};
use backoff::ExponentialBackoffBuilder;

use crate::embedder::{Embedding, EmbedderClient};
use crate::errors::{QuarryError, Result};

pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Maximum number of inputs per OpenAI embeddings API call.
const BATCH_CHUNK_SIZE: usize = 2048;

/// Embedding dimension for a model name; 1536 for unrecognised models.
fn model_dim(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

/// Network failures are [`QuarryError::Transport`] (retryable), everything
/// else [`QuarryError::Embedder`].
fn classify_error(err: OpenAIError) -> QuarryError {
    match &err {
        OpenAIError::Reqwest(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
            QuarryError::Transport(err.to_string())
        }
        OpenAIError::ApiError(api) if api.code.as_deref() == Some("rate_limit_exceeded") => {
            QuarryError::Transport(err.to_string())
        }
        _ => QuarryError::Embedder(err.to_string()),
    }
}

/// OpenAI embedding client that implements [`EmbedderClient`].
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dim: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_config(OpenAIConfig::new().with_api_key(api_key.into()), model)
    }

    fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        let single_attempt = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();
        Self {
            client: Client::with_config(config).with_backoff(single_attempt),
            dim: model_dim(&model),
            model,
        }
    }

    /// Embedder pointing at a mock API base URL.
    #[cfg(test)]
    fn with_base_url(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key("sk-test")
            .with_api_base(base_url.into());
        Self::with_config(config, model)
    }

    async fn embed_chunk(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let input: Vec<String> = texts.iter().map(|s| (*s).to_owned()).collect();
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.as_str())
            .input(input)
            .build()
            .map_err(|e| QuarryError::Embedder(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(classify_error)?;

        if response.data.len() != texts.len() {
            return Err(QuarryError::Embedder(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

impl EmbedderClient for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut embeddings = self.embed_chunk(&[text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| QuarryError::Embedder("empty response from embedding API".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut result = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_CHUNK_SIZE) {
            result.extend(self.embed_chunk(chunk).await?);
        }
        Ok(result)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn make_response(values: &[f32]) -> serde_json::Value {
        // One embedding per value, listed in reverse index order.
        let data: Vec<serde_json::Value> = values
            .iter()
            .enumerate()
            .rev()
            .map(|(i, v)| {
                serde_json::json!({
                    "object": "embedding",
                    "index": i,
                    "embedding": vec![*v; 3],
                })
            })
            .collect();
        serde_json::json!({
            "object": "list",
            "data": data,
            "model": DEFAULT_MODEL,
            "usage": { "prompt_tokens": 8, "total_tokens": 8 },
        })
    }

    async fn mount_ok(server: &MockServer, values: &[f32]) {
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(make_response(values)))
            .mount(server)
            .await;
    }

    fn embedder(server: &MockServer) -> OpenAiEmbedder {
        OpenAiEmbedder::with_base_url(DEFAULT_MODEL, server.uri())
    }

    #[test]
    fn dim_depends_on_model() {
        assert_eq!(OpenAiEmbedder::new("key", "text-embedding-3-small").dim(), 1536);
        assert_eq!(OpenAiEmbedder::new("key", "text-embedding-3-large").dim(), 3072);
        assert_eq!(OpenAiEmbedder::new("key", "some-future-model").dim(), 1536);
    }

    #[tokio::test]
    async fn embed_returns_vector() {
        let server = MockServer::start().await;
        mount_ok(&server, &[0.1]).await;

        let embedding = embedder(&server).embed("hello world").await.unwrap();
        assert_eq!(embedding.len(), 3);
        assert!((embedding[0] - 0.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn embed_batch_restores_input_order() {
        let server = MockServer::start().await;
        mount_ok(&server, &[0.1, 0.2, 0.3]).await;

        let embeddings = embedder(&server)
            .embed_batch(&["alpha", "beta", "gamma"])
            .await
            .unwrap();
        assert_eq!(embeddings.len(), 3);
        assert!((embeddings[0][0] - 0.1).abs() < 1e-6);
        assert!((embeddings[2][0] - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn embed_batch_empty_slice_makes_no_call() {
        let server = MockServer::start().await;
        let embeddings = embedder(&server).embed_batch(&[]).await.unwrap();
        assert!(embeddings.is_empty());
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let server = MockServer::start().await;
        mount_ok(&server, &[]).await;

        let result = embedder(&server).embed("test").await;
        assert!(matches!(result, Err(QuarryError::Embedder(_))));
    }

    #[tokio::test]
    async fn auth_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {
                    "message": "Incorrect API key provided.",
                    "type": "authentication_error",
                    "param": null,
                    "code": "invalid_api_key",
                }
            })))
            .mount(&server)
            .await;

        let err = embedder(&server).embed("test").await.unwrap_err();
        assert!(matches!(err, QuarryError::Embedder(_)));
        assert!(!err.is_transient());
    }
}
