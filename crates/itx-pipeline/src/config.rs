//! Pipeline configuration.

use eyre::{eyre, Context, Result};
use itx_data::fetch::DEFAULT_WORKERS;
use itx_data::hosts::{is_empty, overlapping};
use itx_data::store::DEFAULT_PAGE_SIZE;
use itx_data::HostRange;
use std::time::Duration;

/// Outer chunk size as a multiple of the worker count.
pub const CHUNK_SIZE_PER_WORKER: usize = 10;

/// Largest outer chunk; block numbers of a chunk are bound into one query.
pub const MAX_CHUNK_SIZE: usize = 10_000;

/// Default timeout for one endpoint batch.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable holding comma-separated host ranges.
pub const HOSTS_ENV: &str = "ITX_TRACE_HOSTS";

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Endpoint ranges, checked in order.
    pub hosts: Vec<HostRange>,
    /// Concurrent fetch workers.
    pub workers: usize,
    /// Blocks per outer chunk (progress granularity).
    pub chunk_size: usize,
    /// Transactions per store batch.
    pub page_size: usize,
    /// Timeout for one endpoint batch; a timeout defers the batch's blocks.
    pub request_timeout: Duration,
    pub show_progress: bool,
}

impl PipelineConfig {
    /// Default configuration for `hosts`.
    pub fn new(hosts: Vec<HostRange>) -> Self {
        Self {
            hosts,
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_WORKERS * CHUNK_SIZE_PER_WORKER,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            show_progress: true,
        }
    }

    /// Sets the worker count and scales the chunk size with it.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self.chunk_size = workers.saturating_mul(CHUNK_SIZE_PER_WORKER);
        self
    }

    /// Rejects configurations the pipeline cannot run with.
    ///
    /// # Errors
    /// Returns error on empty/overlapping host ranges or zero sizes.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(eyre!("at least one trace host range is required"));
        }
        if self.workers == 0 {
            return Err(eyre!("workers must be at least 1"));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(eyre!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            ));
        }
        if self.page_size == 0 {
            return Err(eyre!("page size must be at least 1"));
        }
        if let Some(range) = self.hosts.iter().find(|range| is_empty(range)) {
            return Err(eyre!("host range for {} admits no blocks", range.url));
        }
        if let Some(&(a, b)) = overlapping(&self.hosts).first() {
            return Err(eyre!(
                "host ranges overlap: {} and {}",
                self.hosts[a].url,
                self.hosts[b].url
            ));
        }
        Ok(())
    }
}

/// Parses a comma-separated list of `<lower>..<upper>=<url>` ranges.
///
/// # Errors
/// Returns error if any item is malformed.
pub fn parse_hosts(value: &str) -> Result<Vec<HostRange>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<HostRange>()
                .wrap_err_with(|| format!("invalid host range '{item}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_host() -> Vec<HostRange> {
        vec![HostRange::new(None, None, "http://localhost:8545")]
    }

    #[test]
    fn defaults_follow_worker_count() {
        let config = PipelineConfig::new(single_host());
        assert_eq!(config.workers, 10);
        assert_eq!(config.chunk_size, 100);
        assert!(config.validate().is_ok());

        let config = config.with_workers(4);
        assert_eq!(config.chunk_size, 40);
    }

    #[test]
    fn rejects_unusable_settings() {
        assert!(PipelineConfig::new(Vec::new()).validate().is_err());
        assert!(PipelineConfig::new(single_host()).with_workers(0).validate().is_err());

        let mut config = PipelineConfig::new(single_host());
        config.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::new(single_host());
        config.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_overlapping_and_empty_ranges() {
        let overlapping = PipelineConfig::new(vec![
            HostRange::new(Some(0), Some(100), "a"),
            HostRange::new(Some(99), None, "b"),
        ]);
        let err = overlapping.validate().expect_err("overlap must be rejected");
        assert!(err.to_string().contains("overlap"));

        let empty = PipelineConfig::new(vec![HostRange::new(Some(10), Some(10), "a")]);
        assert!(empty.validate().is_err());

        let disjoint = PipelineConfig::new(vec![
            HostRange::new(Some(10), Some(100), "url1"),
            HostRange::new(None, Some(10), "url2"),
            HostRange::new(Some(100), None, "url3"),
        ]);
        assert!(disjoint.validate().is_ok());
    }

    #[test]
    fn parses_host_lists() {
        let hosts = parse_hosts("..4370000=http://a:8545, 4370000..=http://b:8545,")
            .expect("valid list");
        assert_eq!(
            hosts,
            vec![
                HostRange::new(None, Some(4_370_000), "http://a:8545"),
                HostRange::new(Some(4_370_000), None, "http://b:8545"),
            ]
        );
        assert!(parse_hosts("nonsense").is_err());
        assert!(parse_hosts("").expect("empty list").is_empty());
    }
}
