//! Batched `trace_block` JSON-RPC client.
//!
//! Groups block numbers by endpoint, sends one JSON-RPC batch per endpoint
//! and regroups each block's flat trace array into per-transaction traces.
//!
//! Per-block failures never fail the call: blocks that cannot be routed, that
//! come back without a decodable `result`, or whose batch timed out are
//! reported as [`Deferred`] and stay untraced until the next pass. Transport
//! failures, and bodies that are not a JSON array, are returned as errors.

use eyre::{eyre, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

use crate::hosts::route;
use crate::types::{BlockTraces, DeferReason, Deferred, FetchOutcome, HostRange, TraceEntry};

/// Fields the node adds to every entry of a `trace_block` result.
const LOCATION_FIELDS: [&str; 3] = ["transactionHash", "blockHash", "blockNumber"];

/// A single `trace_block` JSON-RPC request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TraceRequest {
    pub jsonrpc: &'static str,
    /// The block number doubles as the request id.
    pub id: u64,
    pub method: &'static str,
    pub params: [String; 1],
}

impl TraceRequest {
    pub fn trace_block(block_number: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            id: block_number,
            method: "trace_block",
            params: [format!("{block_number:#x}")],
        }
    }
}

/// One element of a batch response.
///
/// `result` stays raw so that one malformed block cannot fail its batch.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    /// Flat trace array of the block; `None` when absent or `null`.
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Reply of an endpoint to one batch.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchReply {
    Responses(Vec<RpcResponse>),
    /// The request exceeded its deadline; every block in it is deferred.
    TimedOut,
}

/// Sends JSON-RPC batches to an endpoint.
pub trait TraceTransport: Send + Sync {
    /// Posts `requests` as one batch to `endpoint`.
    ///
    /// # Errors
    /// Returns error on network failure, non-success HTTP status or an
    /// undecodable response body.
    fn post_batch(
        &self,
        endpoint: &str,
        requests: &[TraceRequest],
    ) -> impl Future<Output = Result<BatchReply>> + Send;
}

/// `reqwest`-backed transport with a per-request timeout.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds the HTTP client.
    ///
    /// # Errors
    /// Returns error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl TraceTransport for HttpTransport {
    #[tracing::instrument(skip(self, requests), fields(endpoint = %endpoint, blocks = requests.len()))]
    async fn post_batch(&self, endpoint: &str, requests: &[TraceRequest]) -> Result<BatchReply> {
        let response = match self.client.post(endpoint).json(requests).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(endpoint = %endpoint, "trace batch timed out");
                return Ok(BatchReply::TimedOut);
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("trace batch request to {endpoint} failed"))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(eyre!(
                "trace endpoint {} returned HTTP {}: {}",
                endpoint,
                status.as_u16(),
                body
            ));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => {
                tracing::warn!(endpoint = %endpoint, "trace batch body timed out");
                return Ok(BatchReply::TimedOut);
            }
            Err(e) => {
                return Err(e)
                    .wrap_err_with(|| format!("failed to read trace batch body from {endpoint}"))
            }
        };

        let elements: Vec<Value> = serde_json::from_str(&body)
            .wrap_err_with(|| format!("failed to parse trace batch response from {endpoint}"))?;
        let responses = elements
            .into_iter()
            .filter_map(|element| match serde_json::from_value::<RpcResponse>(element) {
                Ok(response) => Some(response),
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "dropping undecodable batch element");
                    None
                }
            })
            .collect();
        Ok(BatchReply::Responses(responses))
    }
}

/// Regroups a block's flat trace array by transaction position.
///
/// Strips the node's location fields from each entry and drops entries
/// without a `transactionPosition` (block rewards and other block-level
/// traces). Order within each transaction is preserved.
pub fn reconstruct_block(block_number: u64, entries: Vec<TraceEntry>) -> BlockTraces {
    let mut transactions: BTreeMap<u64, Vec<TraceEntry>> = BTreeMap::new();
    let mut block_level = 0usize;

    for mut entry in entries {
        let position = entry
            .fields
            .remove("transactionPosition")
            .and_then(|position| position.as_u64());
        for field in LOCATION_FIELDS {
            entry.fields.remove(field);
        }

        match position {
            Some(position) => transactions.entry(position).or_default().push(entry),
            None => block_level += 1,
        }
    }

    if block_level > 0 {
        tracing::trace!(block_number, block_level, "dropped block-level traces");
    }

    BlockTraces {
        block_number,
        transactions,
    }
}

/// Fetches and reconstructs traces for blocks across the configured endpoints.
#[derive(Debug)]
pub struct TraceClient<T> {
    transport: T,
    hosts: Vec<HostRange>,
}

impl<T: TraceTransport> TraceClient<T> {
    pub fn new(transport: T, hosts: Vec<HostRange>) -> Self {
        Self { transport, hosts }
    }

    pub fn hosts(&self) -> &[HostRange] {
        &self.hosts
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Builds one batch of `trace_block` requests per endpoint.
    ///
    /// Blocks without an endpoint are returned separately and never requested.
    pub fn build_requests(
        &self,
        block_numbers: &[u64],
    ) -> (BTreeMap<String, Vec<TraceRequest>>, Vec<u64>) {
        let mut batches: BTreeMap<String, Vec<TraceRequest>> = BTreeMap::new();
        let mut unroutable = Vec::new();

        for &block_number in block_numbers {
            match route(&self.hosts, block_number) {
                Some(url) => batches
                    .entry(url.to_string())
                    .or_default()
                    .push(TraceRequest::trace_block(block_number)),
                None => unroutable.push(block_number),
            }
        }

        (batches, unroutable)
    }

    /// Fetches traces for `block_numbers`.
    ///
    /// # Errors
    /// Returns error if any endpoint batch fails to transfer or decode.
    #[tracing::instrument(skip_all, fields(blocks = block_numbers.len()))]
    pub async fn fetch_traces(&self, block_numbers: &[u64]) -> Result<FetchOutcome> {
        let (batches, unroutable) = self.build_requests(block_numbers);
        let mut outcome = FetchOutcome::default();

        for block_number in unroutable {
            tracing::debug!(block_number, "no host range for block");
            outcome.deferred.push(Deferred {
                block_number,
                reason: DeferReason::Unroutable,
            });
        }

        for (endpoint, requests) in batches {
            let reply = self
                .transport
                .post_batch(&endpoint, &requests)
                .await
                .wrap_err_with(|| format!("failed to fetch traces from {endpoint}"))?;

            match reply {
                BatchReply::Responses(responses) => {
                    collect_responses(&requests, responses, &mut outcome);
                }
                BatchReply::TimedOut => {
                    outcome.deferred.extend(requests.iter().map(|request| Deferred {
                        block_number: request.id,
                        reason: DeferReason::TimedOut,
                    }));
                }
            }
        }

        tracing::debug!(
            fetched = outcome.traces.len(),
            deferred = outcome.deferred.len(),
            "trace fetch finished"
        );
        Ok(outcome)
    }
}

fn collect_responses(
    requests: &[TraceRequest],
    responses: Vec<RpcResponse>,
    outcome: &mut FetchOutcome,
) {
    let requested: HashSet<u64> = requests.iter().map(|request| request.id).collect();
    let mut malformed = HashSet::new();

    for response in responses {
        let (Some(block_number), Some(result)) = (response.id, response.result) else {
            if let Some(error) = &response.error {
                tracing::debug!(id = ?response.id, error = %error, "trace_block returned an error");
            }
            continue;
        };
        if !requested.contains(&block_number) {
            tracing::warn!(block_number, "response id does not match any request");
            continue;
        }
        match serde_json::from_value::<Vec<TraceEntry>>(result) {
            Ok(entries) => {
                outcome
                    .traces
                    .insert(block_number, reconstruct_block(block_number, entries));
            }
            Err(e) => {
                tracing::warn!(block_number, error = %e, "malformed trace_block result, deferring block");
                malformed.insert(block_number);
                outcome.deferred.push(Deferred {
                    block_number,
                    reason: DeferReason::Malformed,
                });
            }
        }
    }

    for request in requests {
        if !outcome.traces.contains_key(&request.id) && !malformed.contains(&request.id) {
            outcome.deferred.push(Deferred {
                block_number: request.id,
                reason: DeferReason::MissingResult,
            });
        }
    }
}
