//! Parallel trace fetching over a fixed-size worker pool.

use eyre::{eyre, Result};
use std::sync::Arc;

use crate::chunk::chunks;
use crate::traces::{TraceClient, TraceTransport};
use crate::types::FetchOutcome;

/// Default number of concurrent fetch workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Fans block numbers out to `workers` concurrent [`TraceClient`] calls.
///
/// Each worker gets a disjoint sub-chunk and returns its own outcome; the
/// outcomes are merged once all workers finish. Any worker error fails the
/// whole fetch.
#[derive(Debug)]
pub struct FetchCoordinator<T> {
    client: Arc<TraceClient<T>>,
    workers: usize,
}

impl<T: TraceTransport + 'static> FetchCoordinator<T> {
    pub fn new(client: TraceClient<T>, workers: usize) -> Self {
        Self {
            client: Arc::new(client),
            workers: workers.max(1),
        }
    }

    pub fn client(&self) -> &TraceClient<T> {
        &self.client
    }

    /// Fetches traces for `block_numbers` using up to `workers` tasks.
    ///
    /// # Errors
    /// Returns the first worker error, or a join error if a worker panicked.
    #[tracing::instrument(skip_all, fields(blocks = block_numbers.len(), workers = self.workers))]
    pub async fn fetch(&self, block_numbers: &[u64]) -> Result<FetchOutcome> {
        if block_numbers.is_empty() {
            return Ok(FetchOutcome::default());
        }

        let per_worker = block_numbers.len().div_ceil(self.workers);
        let mut handles = Vec::new();
        for (worker, blocks) in chunks(block_numbers.iter().copied(), per_worker).enumerate() {
            let client = self.client.clone();
            handles.push(tokio::spawn(async move {
                tracing::trace!(worker, blocks = blocks.len(), "worker started");
                client.fetch_traces(&blocks).await
            }));
        }

        let results = futures::future::try_join_all(handles)
            .await
            .map_err(|e| eyre!("trace fetch worker failed: {e}"))?;

        let mut outcome = FetchOutcome::default();
        for result in results {
            outcome.merge(result?);
        }
        Ok(outcome)
    }
}
