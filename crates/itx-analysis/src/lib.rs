//! itx-analysis crate
//!
//! Trace classification and flattening of classified entries into
//! internal-transaction documents.

pub mod classify;
pub mod flatten;

pub use classify::{classify_entry, classify_trace, trace_hash, ClassifiedEntry};
pub use flatten::{flatten_entry, internal_transactions};
