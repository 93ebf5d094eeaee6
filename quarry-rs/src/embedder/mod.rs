//! Embedder client abstraction.
//!
//! Turns text into similarity vectors. Calls are single attempts; the
//! similarity gateway applies the timeout and retry policy.

pub mod openai;

use crate::errors::Result;

/// A vector embedding (f32 components).
pub type Embedding = Vec<f32>;

/// Trait for text-to-vector embedding clients.
#[allow(async_fn_in_trait)]
pub trait EmbedderClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed several texts; the output is aligned with the input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Dimensionality of the vectors produced by this client.
    fn dim(&self) -> usize;
}
