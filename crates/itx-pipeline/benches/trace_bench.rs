//! Benchmarks for trace reconstruction and classification.
//!
//! Uses a synthetic `trace_block` result (no RPC).
//! Run with: `cargo bench --package itx-pipeline`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use itx_analysis::{classify_trace, internal_transactions};
use itx_data::traces::reconstruct_block;
use itx_data::{TraceEntry, Transaction};
use serde_json::{json, Map};

const TRANSACTIONS: u64 = 200;
const CALLS_PER_TRANSACTION: u64 = 8;

/// Flat trace array of one block: `CALLS_PER_TRANSACTION` calls per transaction
/// plus one block reward.
fn sample_block() -> Vec<TraceEntry> {
    let mut values = Vec::new();
    for position in 0..TRANSACTIONS {
        for call in 0..CALLS_PER_TRANSACTION {
            values.push(json!({
                "action": {
                    "callType": "call",
                    "from": format!("0x{:040x}", position),
                    "to": format!("0x{:040x}", 1_000 + call),
                    "gas": "0x104f8",
                    "input": "0x",
                    "value": "0x0",
                },
                "result": {"gasUsed": "0x1bbd", "output": "0x"},
                "subtraces": 0,
                "traceAddress": [call],
                "type": "call",
                "transactionPosition": position,
                "transactionHash": format!("0x{:064x}", position),
                "blockHash": "0xbeef",
                "blockNumber": 18_000_000,
            }));
        }
    }
    values.push(json!({
        "action": {"author": "0xminer", "rewardType": "block", "value": "0x1"},
        "result": null,
        "subtraces": 0,
        "traceAddress": [],
        "type": "reward",
        "transactionPosition": null,
    }));

    values
        .into_iter()
        .map(|value| serde_json::from_value(value).unwrap_or_default())
        .collect()
}

fn sample_tx(position: u64) -> Transaction {
    Transaction {
        hash: format!("0x{:064x}", position),
        from: Some(format!("0x{:040x}", position)),
        to: Some(format!("0x{:040x}", 1_000)),
        block_number: 18_000_000,
        transaction_index: position,
        to_contract: true,
        trace: None,
        extra: Map::new(),
    }
}

/// Benchmark: regroup a 1600-entry block by transaction position.
fn bench_reconstruct_block(c: &mut Criterion) {
    c.bench_function("reconstruct_block_1600_entries", |b| {
        b.iter_batched(
            sample_block,
            |entries| black_box(reconstruct_block(18_000_000, entries)),
            BatchSize::SmallInput,
        )
    });
}

/// Benchmark: classify and flatten every transaction of a reconstructed block.
fn bench_classify_block(c: &mut Criterion) {
    let block = reconstruct_block(18_000_000, sample_block());
    let txs: Vec<Transaction> = (0..TRANSACTIONS).map(sample_tx).collect();

    c.bench_function("classify_and_flatten_200_txs", |b| {
        b.iter(|| {
            let mut docs = 0;
            for tx in &txs {
                if let Some(trace) = block.trace_for(tx.transaction_index) {
                    let classified = classify_trace(tx, trace);
                    docs += internal_transactions(tx, &classified).len();
                }
            }
            black_box(docs)
        })
    });
}

criterion_group!(benches, bench_reconstruct_block, bench_classify_block);
criterion_main!(benches);
