//! Flattening of classified trace entries into internal-transaction documents.

use itx_data::{InternalTransaction, Transaction};
use serde_json::{Map, Value};

use crate::classify::ClassifiedEntry;

/// Merges `action` and then `result` into the entry's top level.
///
/// Later sources overwrite earlier keys. `hash` and `class` are written last
/// so the document always carries its own id.
pub fn flatten_entry(classified: &ClassifiedEntry) -> Map<String, Value> {
    let entry = &classified.entry;
    let mut doc = entry.fields.clone();
    doc.extend(entry.action.clone());
    if let Some(result) = &entry.result {
        doc.extend(result.clone());
    }

    doc.insert("hash".to_string(), Value::String(classified.hash.clone()));
    match classified.class {
        Some(class) => {
            doc.insert("class".to_string(), Value::from(class.code()));
        }
        None => {
            doc.remove("class");
        }
    }
    doc
}

/// Builds the persisted documents for one transaction's classified trace.
pub fn internal_transactions(
    transaction: &Transaction,
    classified: &[ClassifiedEntry],
) -> Vec<InternalTransaction> {
    classified
        .iter()
        .map(|entry| InternalTransaction {
            hash: entry.hash.clone(),
            parent_hash: transaction.hash.clone(),
            block_number: transaction.block_number,
            class: entry.class,
            body: flatten_entry(entry),
        })
        .collect()
}
