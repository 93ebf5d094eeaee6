//! Superstep execution: concurrent independent branches, then a barrier.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tracing::debug;

/// Run `branch` for every key with at most `max_concurrency` in flight and
/// wait for all of them.
///
/// Branches never observe each other's results. The output is sorted by key
/// so merging it into state does not depend on completion order.
pub async fn run_superstep<K, T, F, Fut>(
    name: &str,
    keys: Vec<K>,
    max_concurrency: usize,
    branch: F,
) -> Vec<(K, T)>
where
    K: Ord + Clone,
    F: Fn(K) -> Fut,
    Fut: Future<Output = T>,
{
    let scheduled = keys.len();
    let mut results: Vec<(K, T)> = stream::iter(keys)
        .map(|key| {
            let fut = branch(key.clone());
            async move { (key, fut.await) }
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    debug!(superstep = name, branches = scheduled, "superstep barrier reached");
    results
}
