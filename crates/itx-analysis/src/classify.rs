//! Direction classification of trace entries.
//!
//! Each entry of a transaction's trace is compared against the parent
//! transaction's sender and recipient:
//!
//! | entry                                   | class      |
//! |-----------------------------------------|------------|
//! | `from == tx.from && to == tx.to`        | `Input`    |
//! | `from == tx.to && to == tx.from`        | `Internal` |
//! | `from == tx.from && to != from`         | `Output`   |
//! | anything else, or no `from`/`to`        | `Other`    |
//!
//! Rules are checked top to bottom; the first match wins.

use itx_data::{TraceClass, TraceEntry, Transaction};

/// A trace entry annotated with its id and direction.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifiedEntry {
    pub entry: TraceEntry,
    /// `<parent hash>.<index>`.
    pub hash: String,
    /// `None` when the parent transaction has no sender.
    pub class: Option<TraceClass>,
}

/// Deterministic id of the `index`-th entry of `parent_hash`'s trace.
pub fn trace_hash(parent_hash: &str, index: usize) -> String {
    format!("{parent_hash}.{index}")
}

/// Classifies one entry against the parent's sender and recipient.
pub fn classify_entry(tx_from: &str, tx_to: Option<&str>, entry: &TraceEntry) -> TraceClass {
    let (Some(from), Some(to)) = (entry.action_address("from"), entry.action_address("to")) else {
        return TraceClass::Other;
    };

    if from == tx_from && Some(to) == tx_to {
        TraceClass::Input
    } else if Some(from) == tx_to && to == tx_from {
        TraceClass::Internal
    } else if from == tx_from && to != from {
        TraceClass::Output
    } else {
        TraceClass::Other
    }
}

/// Assigns ids to every entry of `trace`, then classifies them.
///
/// Ids follow the node's entry order. If the transaction has no `from`, the
/// entries keep their ids but get no class.
pub fn classify_trace(transaction: &Transaction, trace: &[TraceEntry]) -> Vec<ClassifiedEntry> {
    let sender = transaction.from.as_deref();

    trace
        .iter()
        .enumerate()
        .map(|(index, entry)| ClassifiedEntry {
            entry: entry.clone(),
            hash: trace_hash(&transaction.hash, index),
            class: sender
                .map(|from| classify_entry(from, transaction.to.as_deref(), entry)),
        })
        .collect()
}
