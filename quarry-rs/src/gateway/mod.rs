//! Gateways to external services.
//!
//! Every call to the generation service, the embedder, or the similarity
//! index goes through [`with_retry`]: each attempt runs under its own
//! timeout, transient failures are retried with exponential backoff, and the
//! attempt count is bounded by [`RetryPolicy::max_attempts`].

pub mod generation;
pub mod similarity;

use std::future::Future;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;
use validator::Validate;

use crate::errors::{QuarryError, Result};

pub use generation::{GenerationRequest, OutputContract, StructuredGateway};
pub use similarity::SimilarityGateway;

/// Timeout and retry policy applied to every gateway call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetryPolicy {
    /// Timeout of a single attempt.
    #[validate(range(min = 1))]
    pub call_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub initial_backoff_ms: u64,
    #[validate(range(min = 1))]
    pub max_backoff_ms: u64,
    /// Total attempts including the first one.
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_timeout_ms: 60_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.max_backoff_ms))
            // Attempts are bounded by count, not elapsed time.
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run `call` under `policy`.
///
/// Each attempt is wrapped in [`tokio::time::timeout`]; an elapsed attempt
/// becomes [`QuarryError::Timeout`]. Errors for which
/// [`QuarryError::is_transient`] holds are retried until the attempt budget is
/// spent; any other error is returned immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let timeout = policy.call_timeout();
    let mut attempt = 0u32;

    backoff::future::retry(policy.backoff(), || {
        attempt += 1;
        let current = attempt;
        let fut = call();
        async move {
            let outcome = match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(QuarryError::Timeout(timeout)),
            };
            match outcome {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && current < max_attempts => {
                    warn!(operation, attempt = current, error = %e, "transient failure, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}
