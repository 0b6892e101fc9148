//! Type definitions for transactions, trace entries and fetch outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Block-number interval served by one trace-capable endpoint.
///
/// `lower` is inclusive, `upper` is exclusive; `None` leaves that side unbounded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRange {
    /// Lowest block number served (inclusive).
    pub lower: Option<u64>,
    /// First block number no longer served (exclusive).
    pub upper: Option<u64>,
    /// JSON-RPC endpoint URL.
    pub url: String,
}

impl HostRange {
    /// Creates a range for `url` over `[lower, upper)`.
    pub fn new(lower: Option<u64>, upper: Option<u64>, url: impl Into<String>) -> Self {
        Self {
            lower,
            upper,
            url: url.into(),
        }
    }

    /// Whether this range serves `block_number`.
    pub fn admits(&self, block_number: u64) -> bool {
        self.lower.map_or(true, |lower| block_number >= lower)
            && self.upper.map_or(true, |upper| block_number < upper)
    }
}

/// Transaction document as produced by the upstream ingestion.
///
/// Only `trace` is ever written by this crate. Fields the pipeline does not
/// read are kept in `extra` so a stored document round-trips unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction hash (document id).
    pub hash: String,
    /// Sender address; absent on malformed upstream documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Recipient address; absent for contract creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Block number.
    pub block_number: u64,
    /// Position of the transaction within its block.
    pub transaction_index: u64,
    /// Set by the contract-detection stage when `to` is a contract.
    #[serde(rename = "to_contract", default)]
    pub to_contract: bool,
    /// Set once the internal transactions have been persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<bool>,
    /// Remaining document fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One call-tree entry of a transaction trace, with the node's location
/// fields (`transactionPosition`, `transactionHash`, `blockHash`,
/// `blockNumber`) already stripped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Call/create/suicide parameters (`from`, `to`, `callType`, `value`, ...).
    #[serde(default)]
    pub action: Map<String, Value>,
    /// Execution result (`gasUsed`, `output`); `None` when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    /// Everything else: `subtraces`, `traceAddress`, `type`, `error`, ...
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TraceEntry {
    /// Address-like string field of `action`; `null` counts as absent.
    pub fn action_address(&self, key: &str) -> Option<&str> {
        self.action.get(key).and_then(Value::as_str)
    }
}

/// Reconstructed traces of one block, keyed by transaction position.
///
/// Entries inside each trace keep the order returned by the node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockTraces {
    pub block_number: u64,
    pub transactions: BTreeMap<u64, Vec<TraceEntry>>,
}

impl BlockTraces {
    /// Trace of the transaction at `transaction_index`, if the node returned one.
    pub fn trace_for(&self, transaction_index: u64) -> Option<&[TraceEntry]> {
        self.transactions
            .get(&transaction_index)
            .map(Vec::as_slice)
    }
}

/// Why a block produced no traces in this pass.
///
/// Deferred blocks stay untraced and are picked up by the next discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferReason {
    /// No configured host range covers the block.
    Unroutable,
    /// The node's response for the block carried no `result`.
    MissingResult,
    /// The block's `result` (or its response object) did not decode.
    Malformed,
    /// The endpoint batch containing the block timed out.
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deferred {
    pub block_number: u64,
    pub reason: DeferReason,
}

/// Result of fetching traces for a set of blocks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchOutcome {
    /// Blocks whose traces were fetched and reconstructed.
    pub traces: BTreeMap<u64, BlockTraces>,
    /// Blocks left for a later pass.
    pub deferred: Vec<Deferred>,
}

impl FetchOutcome {
    /// Folds another outcome into this one.
    pub fn merge(&mut self, other: FetchOutcome) {
        self.traces.extend(other.traces);
        self.deferred.extend(other.deferred);
    }

    /// Trace of one transaction, looked up by block and position.
    pub fn trace_for(&self, block_number: u64, transaction_index: u64) -> Option<&[TraceEntry]> {
        self.traces
            .get(&block_number)
            .and_then(|block| block.trace_for(transaction_index))
    }

    pub fn is_deferred(&self, block_number: u64) -> bool {
        self.deferred
            .iter()
            .any(|deferred| deferred.block_number == block_number)
    }
}

/// Direction of a trace entry relative to its parent transaction.
///
/// Persisted as its integer code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TraceClass {
    /// Same sender and recipient as the parent transaction.
    Input,
    /// Call from the parent's recipient back to its sender.
    Internal,
    /// Call from the parent's sender to a third party.
    Output,
    /// Anything else, including entries without `from`/`to`.
    Other,
}

impl TraceClass {
    pub const ALL: [TraceClass; 4] = [
        TraceClass::Input,
        TraceClass::Internal,
        TraceClass::Output,
        TraceClass::Other,
    ];

    pub fn code(self) -> u8 {
        match self {
            TraceClass::Input => 0,
            TraceClass::Internal => 1,
            TraceClass::Output => 2,
            TraceClass::Other => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TraceClass::Input => "INPUT",
            TraceClass::Internal => "INTERNAL",
            TraceClass::Output => "OUTPUT",
            TraceClass::Other => "OTHER",
        }
    }
}

impl Serialize for TraceClass {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for TraceClass {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        TraceClass::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown trace class {code}")))
    }
}

/// Flattened, classified trace entry ready for persistence.
#[derive(Clone, Debug, PartialEq)]
pub struct InternalTransaction {
    /// `<parent hash>.<index>`; the document id.
    pub hash: String,
    /// Hash of the transaction this entry was traced from.
    pub parent_hash: String,
    /// Block of the parent transaction.
    pub block_number: u64,
    /// `None` when the parent transaction could not be classified.
    pub class: Option<TraceClass>,
    /// The flattened document, including `hash` and `class`.
    pub body: Map<String, Value>,
}
