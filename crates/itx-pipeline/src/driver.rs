//! One extraction pass: discover untraced blocks, fetch their traces in
//! parallel, classify each contract transaction's trace and persist the
//! results.
//!
//! Chunks are committed as they finish. A failing chunk aborts the pass, but
//! everything written before it stays, and the next discovery skips it.

use eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use itx_analysis::{classify_trace, internal_transactions};
use itx_data::chunk::chunks;
use itx_data::fetch::FetchCoordinator;
use itx_data::store::Store;
use itx_data::traces::{HttpTransport, TraceClient, TraceTransport};
use itx_data::DeferReason;

use crate::config::PipelineConfig;

/// Counters for one pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub blocks_discovered: usize,
    pub blocks_fetched: usize,
    pub blocks_deferred: usize,
    /// Transactions whose internal transactions were persisted and flagged.
    pub transactions_traced: usize,
    /// Transactions left untraced because their block produced no trace.
    pub transactions_skipped: usize,
    /// Traced transactions without a sender; persisted without a class.
    pub transactions_unclassifiable: usize,
    pub internal_transactions: usize,
}

impl PassReport {
    fn absorb(&mut self, other: PassReport) {
        self.blocks_discovered += other.blocks_discovered;
        self.blocks_fetched += other.blocks_fetched;
        self.blocks_deferred += other.blocks_deferred;
        self.transactions_traced += other.transactions_traced;
        self.transactions_skipped += other.transactions_skipped;
        self.transactions_unclassifiable += other.transactions_unclassifiable;
        self.internal_transactions += other.internal_transactions;
    }
}

pub struct Pipeline<'a, T> {
    store: &'a Store,
    coordinator: FetchCoordinator<T>,
    config: PipelineConfig,
}

impl<'a> Pipeline<'a, HttpTransport> {
    /// Pipeline talking to the configured hosts over HTTP.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn http(store: &'a Store, config: PipelineConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.request_timeout)?;
        Self::new(store, transport, config)
    }
}

impl<'a, T: TraceTransport + 'static> Pipeline<'a, T> {
    /// # Errors
    /// Returns error if the configuration is invalid.
    pub fn new(store: &'a Store, transport: T, config: PipelineConfig) -> Result<Self> {
        config.validate().wrap_err("invalid pipeline configuration")?;
        let client = TraceClient::new(transport, config.hosts.clone());
        Ok(Self {
            store,
            coordinator: FetchCoordinator::new(client, config.workers),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one full pass over every untraced block in the configured ranges.
    ///
    /// # Errors
    /// Returns error on the first failing chunk; earlier chunks stay committed.
    #[tracing::instrument(skip(self))]
    pub async fn extract_traces(&self) -> Result<PassReport> {
        let blocks = self
            .store
            .untraced_blocks(&self.config.hosts)
            .wrap_err("failed to discover untraced blocks")?;

        let mut report = PassReport {
            blocks_discovered: blocks.len(),
            ..PassReport::default()
        };
        if blocks.is_empty() {
            tracing::info!("no untraced blocks in configured ranges");
            return Ok(report);
        }

        let block_chunks: Vec<Vec<u64>> = chunks(blocks, self.config.chunk_size).collect();
        let pb = if self.config.show_progress {
            ProgressBar::new(block_chunks.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta}) {msg}",
            )
            .wrap_err("invalid progress bar template")?,
        );

        for chunk in &block_chunks {
            let chunk_report = self.extract_chunk(chunk).await.wrap_err_with(|| {
                format!(
                    "failed to extract traces for blocks {}..={}",
                    chunk.first().copied().unwrap_or_default(),
                    chunk.last().copied().unwrap_or_default()
                )
            })?;
            report.absorb(chunk_report);
            pb.set_message(format!("{} internal txs", report.internal_transactions));
            pb.inc(1);
        }
        pb.finish_with_message("✓ Traces extracted");

        tracing::info!(
            blocks_discovered = report.blocks_discovered,
            blocks_fetched = report.blocks_fetched,
            blocks_deferred = report.blocks_deferred,
            transactions_traced = report.transactions_traced,
            transactions_skipped = report.transactions_skipped,
            transactions_unclassifiable = report.transactions_unclassifiable,
            internal_transactions = report.internal_transactions,
            "extraction pass finished"
        );
        Ok(report)
    }

    /// Fetches, classifies and persists one chunk of blocks.
    ///
    /// Internal transactions are written before their parents are flagged,
    /// so an interruption never leaves a flagged transaction without documents.
    ///
    /// # Errors
    /// Returns error if the fetch or any store write fails.
    #[tracing::instrument(skip_all, fields(blocks = blocks.len()))]
    pub async fn extract_chunk(&self, blocks: &[u64]) -> Result<PassReport> {
        let outcome = self.coordinator.fetch(blocks).await?;

        let mut report = PassReport {
            blocks_fetched: outcome.traces.len(),
            blocks_deferred: outcome.deferred.len(),
            ..PassReport::default()
        };
        for deferred in &outcome.deferred {
            match deferred.reason {
                DeferReason::Unroutable => {
                    tracing::debug!(block_number = deferred.block_number, "block not routable")
                }
                DeferReason::MissingResult | DeferReason::Malformed | DeferReason::TimedOut => tracing::warn!(
                    block_number = deferred.block_number,
                    reason = ?deferred.reason,
                    "block deferred to next pass"
                ),
            }
        }

        for batch in self.store.untraced_transactions(blocks, self.config.page_size) {
            let batch = batch.wrap_err("failed to load untraced transactions")?;

            let mut traced = Vec::with_capacity(batch.len());
            let mut docs = Vec::new();
            for tx in &batch {
                let Some(trace) = outcome.trace_for(tx.block_number, tx.transaction_index) else {
                    tracing::debug!(
                        tx_hash = %tx.hash,
                        block_number = tx.block_number,
                        "no trace for transaction, leaving untraced"
                    );
                    report.transactions_skipped += 1;
                    continue;
                };

                if tx.from.is_none() {
                    tracing::warn!(tx_hash = %tx.hash, "transaction has no sender, persisting trace unclassified");
                    report.transactions_unclassifiable += 1;
                }

                let classified = classify_trace(tx, trace);
                docs.extend(internal_transactions(tx, &classified));
                traced.push(tx.hash.clone());
            }

            report.internal_transactions += self
                .store
                .save_internal_transactions(&docs)
                .wrap_err("failed to save internal transactions")?;
            report.transactions_traced += self
                .store
                .save_trace_flags(&traced)
                .wrap_err("failed to flag traced transactions")?;
        }

        tracing::debug!(
            traced = report.transactions_traced,
            skipped = report.transactions_skipped,
            "chunk persisted"
        );
        Ok(report)
    }
}
