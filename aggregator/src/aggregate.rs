//! Fan-out of one request to all of its upstreams.

use crate::fetcher::{Fetch, FetchOutcome};
use crate::merger::MergedNumbers;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Fetches every upstream concurrently and merges what they return.
#[derive(Clone)]
pub struct Aggregator {
    fetcher: Arc<dyn Fetch>,
}

impl Aggregator {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self { fetcher }
    }

    /// Returns the deduplicated numbers of all `urls`, ascending.
    ///
    /// URLs are not deduplicated; a repeated URL is fetched once per
    /// occurrence. Failed fetches contribute nothing. Dropping the returned
    /// future aborts all fetches still in flight.
    pub async fn aggregate(&self, urls: Vec<String>) -> Vec<i64> {
        let mut join_set = JoinSet::new();

        for url in urls {
            let fetcher = self.fetcher.clone();
            join_set.spawn(async move { fetcher.fetch(&url).await });
        }

        // Only this loop touches the merge, one completed fetch at a time.
        let mut merged = MergedNumbers::new();
        let mut failed = 0;

        while let Some(join_result) = join_set.join_next().await {
            match join_result {
                Ok(outcome) => {
                    if !outcome.is_success() {
                        failed += 1;
                    }
                    merge_outcome(&mut merged, outcome);
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!("Fetch task failed: {e}");
                }
            }
        }

        tracing::debug!(
            unique = merged.len(),
            failed_upstreams = failed,
            "All upstream fetches completed"
        );

        merged.into_sorted()
    }
}

fn merge_outcome(merged: &mut MergedNumbers, outcome: FetchOutcome) {
    tracing::debug!(
        url = %outcome.url,
        elapsed = ?outcome.elapsed,
        numbers = ?outcome.numbers,
        "Merging upstream result"
    );
    merged.merge(&outcome.numbers);
}
