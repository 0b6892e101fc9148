//! itx-data crate
//!
//! Trace retrieval and persistence: endpoint routing, batched `trace_block`
//! fetching, per-transaction trace reconstruction and the SQLite document store.

pub mod chunk;
pub mod fetch;
pub mod hosts;
pub mod store;
pub mod traces;
pub mod types;

pub use types::{
    BlockTraces, DeferReason, Deferred, FetchOutcome, HostRange, InternalTransaction, TraceClass,
    TraceEntry, Transaction,
};
