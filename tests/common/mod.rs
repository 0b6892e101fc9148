//! Shared test helpers: a scripted trace endpoint and document factories.

#![allow(dead_code)]

use eyre::{eyre, Result};
use itx_data::store::Store;
use itx_data::traces::{BatchReply, RpcResponse, TraceRequest, TraceTransport};
use itx_data::{HostRange, Transaction};
use itx_pipeline::PipelineConfig;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Sender of the sample trace's outer call.
pub const SENDER: &str = "0xa74d69c0aef9166aca23d563f38cbf85fe3e39a6";
/// Contract called by the sample trace.
pub const CONTRACT: &str = "0x1fcb809dbe044fb3875463281d1bb55c4476a28b";

#[derive(Default)]
struct Script {
    blocks: HashMap<u64, Value>,
    down: HashSet<String>,
    timing_out: HashSet<String>,
    calls: Vec<(String, Vec<TraceRequest>)>,
}

/// In-memory trace endpoint(s) whose answers tests can change between passes.
///
/// Clones share the same script.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every endpoint answer `trace_block(block_number)` with `result`.
    pub fn set_block(&self, block_number: u64, result: Value) {
        self.lock().blocks.insert(block_number, result);
    }

    /// Makes `trace_block(block_number)` answer with an RPC error.
    pub fn remove_block(&self, block_number: u64) {
        self.lock().blocks.remove(&block_number);
    }

    /// Makes every batch sent to `endpoint` fail at the transport level.
    pub fn set_down(&self, endpoint: &str, down: bool) {
        let mut script = self.lock();
        if down {
            script.down.insert(endpoint.to_string());
        } else {
            script.down.remove(endpoint);
        }
    }

    pub fn set_timing_out(&self, endpoint: &str) {
        self.lock().timing_out.insert(endpoint.to_string());
    }

    /// Every batch received so far, as `(endpoint, requests)`.
    pub fn calls(&self) -> Vec<(String, Vec<TraceRequest>)> {
        self.lock().calls.clone()
    }

    /// Block numbers requested from `endpoint`, sorted.
    pub fn requested_from(&self, endpoint: &str) -> Vec<u64> {
        let mut blocks: Vec<u64> = self
            .calls()
            .into_iter()
            .filter(|(url, _)| url == endpoint)
            .flat_map(|(_, requests)| requests.into_iter().map(|r| r.id))
            .collect();
        blocks.sort_unstable();
        blocks
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TraceTransport for ScriptedTransport {
    async fn post_batch(&self, endpoint: &str, requests: &[TraceRequest]) -> Result<BatchReply> {
        let mut script = self.lock();
        script.calls.push((endpoint.to_string(), requests.to_vec()));

        if script.down.contains(endpoint) {
            return Err(eyre!("connection refused by {endpoint}"));
        }
        if script.timing_out.contains(endpoint) {
            return Ok(BatchReply::TimedOut);
        }

        requests
            .iter()
            .map(|request| {
                let value = match script.blocks.get(&request.id) {
                    Some(result) => json!({"jsonrpc": "2.0", "id": request.id, "result": result}),
                    None => json!({
                        "jsonrpc": "2.0",
                        "id": request.id,
                        "error": {"code": -32000, "message": "unknown block"}
                    }),
                };
                serde_json::from_value::<RpcResponse>(value).map_err(Into::into)
            })
            .collect::<Result<Vec<_>>>()
            .map(BatchReply::Responses)
    }
}

/// Creates an in-memory SQLite Store.
///
/// # Panics
/// Panics if the in-memory database cannot be created (should never happen).
pub fn test_store() -> Store {
    Store::new(":memory:").expect("in-memory store should always open")
}

/// Pipeline configuration with the progress bar disabled.
pub fn test_config(hosts: Vec<HostRange>) -> PipelineConfig {
    let mut config = PipelineConfig::new(hosts);
    config.show_progress = false;
    config
}

/// Contract transaction from [`SENDER`] to [`CONTRACT`].
pub fn contract_tx(hash: &str, block_number: u64, transaction_index: u64) -> Transaction {
    Transaction {
        hash: hash.to_string(),
        from: Some(SENDER.to_string()),
        to: Some(CONTRACT.to_string()),
        block_number,
        transaction_index,
        to_contract: true,
        trace: None,
        extra: Map::new(),
    }
}

/// The two-call trace of a contract that refunds its caller, as returned by
/// `trace_block` for the transaction at `position`.
pub fn sample_trace(position: u64, block_number: u64) -> Vec<Value> {
    let located = |mut entry: Value| {
        let object = entry.as_object_mut().expect("entry is an object");
        object.insert("transactionPosition".into(), json!(position));
        object.insert("transactionHash".into(), json!(format!("0x{position:064x}")));
        object.insert("blockHash".into(), json!("0x9a4e"));
        object.insert("blockNumber".into(), json!(block_number));
        entry
    };

    vec![
        located(json!({
            "action": {
                "callType": "call",
                "from": SENDER,
                "gas": "0x104f8",
                "input": "0x3cc86b80000000000000000000000000000000000000000000000000016345785d8a0000000000000000000000000000a74d69c0aef9166aca23d563f38cbf85fe3e39a6",
                "to": CONTRACT,
                "value": "0x0"
            },
            "result": {"gasUsed": "0x1bbd", "output": "0x"},
            "subtraces": 1,
            "traceAddress": [],
            "type": "call"
        })),
        located(json!({
            "action": {
                "callType": "call",
                "from": CONTRACT,
                "gas": "0x8fc",
                "input": "0x",
                "to": SENDER,
                "value": "0x16345785d8a0000"
            },
            "result": {"gasUsed": "0x0", "output": "0x"},
            "subtraces": 0,
            "traceAddress": [0],
            "type": "call"
        })),
    ]
}

/// Block reward entry; block-level, so it has no transaction position.
pub fn reward_trace(block_number: u64) -> Value {
    json!({
        "action": {"author": "0xminer", "rewardType": "block", "value": "0x1bc16d674ec80000"},
        "result": null,
        "subtraces": 0,
        "traceAddress": [],
        "type": "reward",
        "transactionPosition": null,
        "transactionHash": null,
        "blockHash": "0x9a4e",
        "blockNumber": block_number
    })
}

/// `trace_block` result for a block whose transactions all run [`sample_trace`].
pub fn sample_block(block_number: u64, transactions: u64) -> Value {
    let mut entries: Vec<Value> = (0..transactions)
        .flat_map(|position| sample_trace(position, block_number))
        .collect();
    entries.push(reward_trace(block_number));
    Value::Array(entries)
}

/// The documents [`sample_trace`] flattens to, without `hash` and `class`.
pub fn expected_internal_transactions() -> Vec<Value> {
    vec![
        json!({
            "callType": "call",
            "from": SENDER,
            "gas": "0x104f8",
            "input": "0x3cc86b80000000000000000000000000000000000000000000000000016345785d8a0000000000000000000000000000a74d69c0aef9166aca23d563f38cbf85fe3e39a6",
            "to": CONTRACT,
            "value": "0x0",
            "gasUsed": "0x1bbd",
            "output": "0x",
            "subtraces": 1,
            "traceAddress": [],
            "type": "call"
        }),
        json!({
            "callType": "call",
            "from": CONTRACT,
            "gas": "0x8fc",
            "input": "0x",
            "to": SENDER,
            "value": "0x16345785d8a0000",
            "gasUsed": "0x0",
            "output": "0x",
            "subtraces": 0,
            "traceAddress": [0],
            "type": "call"
        }),
    ]
}
