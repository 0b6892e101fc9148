//! SQLite document store for transactions and internal transactions.
//!
//! Uses WAL mode and writes batches inside one SQL transaction. Every write
//! is keyed by a deterministic id, so re-running a pass overwrites rather
//! than duplicates.

use eyre::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::{Map, Value};
use std::cell::RefCell;

use crate::chunk::chunks;
use crate::types::{HostRange, InternalTransaction, TraceClass, Transaction};

/// Upper bound on ids bound into a single `IN (...)` update.
const FLAG_BATCH: usize = 500;

/// Default number of transactions per untraced batch.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

pub struct Store {
    conn: RefCell<Connection>,
}

/// Row counts reported by `status`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub transactions: u64,
    pub contract_transactions: u64,
    pub traced_transactions: u64,
    pub untraced_contract_transactions: u64,
    pub internal_transactions: u64,
    /// Internal transactions per class code; `None` counts unclassified ones.
    pub by_class: Vec<(Option<TraceClass>, u64)>,
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .wrap_err_with(|| format!("failed to open database at {path}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: RefCell::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.borrow_mut().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS transactions (
                hash TEXT PRIMARY KEY,
                block_number INTEGER NOT NULL,
                transaction_index INTEGER NOT NULL,
                from_address TEXT,
                to_address TEXT,
                to_contract INTEGER NOT NULL DEFAULT 0,
                trace INTEGER,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS transactions_untraced
                ON transactions (block_number) WHERE trace IS NULL;

            CREATE TABLE IF NOT EXISTS internal_transactions (
                hash TEXT PRIMARY KEY,
                parent_hash TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                class INTEGER,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS internal_transactions_parent
                ON internal_transactions (parent_hash);
            ",
        )?;
        Ok(())
    }

    /// Upserts transaction documents by hash.
    ///
    /// This is the ingestion entry point; the pipeline itself only flags.
    ///
    /// # Errors
    /// Returns error if serialization or the insert fails.
    pub fn insert_transactions(&self, txs: &[Transaction]) -> Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO transactions (
                    hash, block_number, transaction_index, from_address, to_address,
                    to_contract, trace, body
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(hash) DO UPDATE SET
                    block_number = excluded.block_number,
                    transaction_index = excluded.transaction_index,
                    from_address = excluded.from_address,
                    to_address = excluded.to_address,
                    to_contract = excluded.to_contract,
                    trace = excluded.trace,
                    body = excluded.body
                ",
            )?;

            for t in txs {
                let body = serde_json::to_string(t)
                    .wrap_err_with(|| format!("failed to serialize transaction {}", t.hash))?;
                stmt.execute(params![
                    t.hash,
                    t.block_number,
                    t.transaction_index,
                    t.from,
                    t.to,
                    t.to_contract,
                    t.trace,
                    body,
                ])?;
            }
        }

        let count = txs.len();
        tx.commit()?;
        Ok(count)
    }

    /// Loads one transaction document.
    ///
    /// # Errors
    /// Returns error if the query fails or the stored body is not valid JSON.
    pub fn get_transaction(&self, hash: &str) -> Result<Option<Transaction>> {
        let conn = self.conn.borrow();
        let row = conn
            .query_row(
                "SELECT body, trace FROM transactions WHERE hash = ?",
                params![hash],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<bool>>(1)?)),
            )
            .optional()?;
        row.map(|(body, trace)| decode_transaction(&body, trace))
            .transpose()
    }

    /// Distinct block numbers holding untraced contract transactions inside
    /// any of the configured host ranges, ascending.
    ///
    /// # Errors
    /// Returns error if the query fails.
    #[tracing::instrument(skip_all, fields(ranges = hosts.len()))]
    pub fn untraced_blocks(&self, hosts: &[HostRange]) -> Result<Vec<u64>> {
        if hosts.is_empty() {
            return Ok(Vec::new());
        }

        let mut predicates = Vec::with_capacity(hosts.len());
        let mut bounds: Vec<u64> = Vec::new();
        for range in hosts {
            let mut clauses = Vec::new();
            if let Some(lower) = range.lower {
                clauses.push("block_number >= ?");
                bounds.push(lower);
            }
            if let Some(upper) = range.upper {
                clauses.push("block_number < ?");
                bounds.push(upper);
            }
            if clauses.is_empty() {
                predicates.push("1".to_string());
            } else {
                predicates.push(format!("({})", clauses.join(" AND ")));
            }
        }

        let sql = format!(
            "SELECT DISTINCT block_number FROM transactions
             WHERE to_contract = 1 AND trace IS NULL AND ({})
             ORDER BY block_number",
            predicates.join(" OR ")
        );

        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(&sql)?;
        let blocks = stmt
            .query_map(params_from_iter(bounds), |row| row.get::<_, u64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(blocks = blocks.len(), "discovered untraced blocks");
        Ok(blocks)
    }

    /// One page of untraced contract transactions in `blocks`, ordered by
    /// hash and starting strictly after `after`.
    ///
    /// # Errors
    /// Returns error if the query fails or a stored body is not valid JSON.
    pub fn untraced_transactions_page(
        &self,
        blocks: &[u64],
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        if blocks.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; blocks.len()].join(", ");
        let sql = format!(
            "SELECT body, trace FROM transactions
             WHERE to_contract = 1 AND trace IS NULL
               AND block_number IN ({placeholders})
               AND hash > ?
             ORDER BY hash
             LIMIT ?"
        );

        let after = after.unwrap_or("");
        let mut values: Vec<&dyn ToSql> = blocks.iter().map(|block| block as &dyn ToSql).collect();
        values.push(&after);
        values.push(&limit);

        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<bool>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(body, trace)| decode_transaction(body, *trace))
            .collect()
    }

    /// Lazily pages through untraced contract transactions in `blocks`.
    ///
    /// Each batch is queried on demand, so flags written between batches
    /// never shift the cursor.
    pub fn untraced_transactions<'a>(
        &'a self,
        blocks: &'a [u64],
        page_size: usize,
    ) -> UntracedTransactions<'a> {
        UntracedTransactions {
            store: self,
            blocks,
            page_size: page_size.max(1),
            cursor: None,
            done: false,
        }
    }

    /// Sets `trace = true` on exactly the given transactions.
    ///
    /// # Errors
    /// Returns error if the update fails.
    pub fn save_trace_flags(&self, hashes: &[String]) -> Result<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        let mut updated = 0;
        for group in chunks(hashes, FLAG_BATCH) {
            let placeholders = vec!["?"; group.len()].join(", ");
            let sql = format!(
                "UPDATE transactions
                 SET trace = 1, body = json_set(body, '$.trace', json('true'))
                 WHERE hash IN ({placeholders})"
            );
            updated += tx.execute(&sql, params_from_iter(group))?;
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Upserts internal transactions by their deterministic hash.
    ///
    /// # Errors
    /// Returns error if serialization or the insert fails.
    pub fn save_internal_transactions(&self, docs: &[InternalTransaction]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO internal_transactions (hash, parent_hash, block_number, class, body)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(hash) DO UPDATE SET
                    parent_hash = excluded.parent_hash,
                    block_number = excluded.block_number,
                    class = excluded.class,
                    body = excluded.body
                ",
            )?;

            for doc in docs {
                let body = serde_json::to_string(&doc.body).wrap_err_with(|| {
                    format!("failed to serialize internal transaction {}", doc.hash)
                })?;
                stmt.execute(params![
                    doc.hash,
                    doc.parent_hash,
                    doc.block_number,
                    doc.class.map(TraceClass::code),
                    body,
                ])?;
            }
        }

        let count = docs.len();
        tx.commit()?;
        Ok(count)
    }

    /// Internal transactions of one parent, ordered by trace index.
    ///
    /// # Errors
    /// Returns error if the query fails or a stored row is malformed.
    pub fn internal_transactions_for(&self, parent_hash: &str) -> Result<Vec<InternalTransaction>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "SELECT hash, parent_hash, block_number, class, body
             FROM internal_transactions WHERE parent_hash = ?",
        )?;
        let rows = stmt
            .query_map(params![parent_hash], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u64>(2)?,
                    row.get::<_, Option<u8>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut docs = rows
            .into_iter()
            .map(|(hash, parent_hash, block_number, class, body)| {
                let body: Map<String, Value> = serde_json::from_str(&body)
                    .wrap_err_with(|| format!("corrupt internal transaction {hash}"))?;
                Ok(InternalTransaction {
                    hash,
                    parent_hash,
                    block_number,
                    class: class.and_then(TraceClass::from_code),
                    body,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        docs.sort_by_key(|doc| trace_index(&doc.hash));
        Ok(docs)
    }

    /// Counts for the `status` command.
    ///
    /// # Errors
    /// Returns error if a query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.borrow();
        let count = |sql: &str| -> Result<u64> {
            conn.query_row(sql, [], |row| row.get::<_, u64>(0))
                .wrap_err_with(|| format!("failed to run '{sql}'"))
        };

        let mut stats = StoreStats {
            transactions: count("SELECT COUNT(*) FROM transactions")?,
            contract_transactions: count(
                "SELECT COUNT(*) FROM transactions WHERE to_contract = 1",
            )?,
            traced_transactions: count("SELECT COUNT(*) FROM transactions WHERE trace = 1")?,
            untraced_contract_transactions: count(
                "SELECT COUNT(*) FROM transactions WHERE to_contract = 1 AND trace IS NULL",
            )?,
            internal_transactions: count("SELECT COUNT(*) FROM internal_transactions")?,
            by_class: Vec::new(),
        };

        let mut stmt = conn.prepare(
            "SELECT class, COUNT(*) FROM internal_transactions GROUP BY class ORDER BY class",
        )?;
        stats.by_class = stmt
            .query_map([], |row| {
                Ok((row.get::<_, Option<u8>>(0)?, row.get::<_, u64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(class, n)| (class.and_then(TraceClass::from_code), n))
            .collect();

        Ok(stats)
    }
}

/// Lazy batches of untraced transactions; see [`Store::untraced_transactions`].
pub struct UntracedTransactions<'a> {
    store: &'a Store,
    blocks: &'a [u64],
    page_size: usize,
    cursor: Option<String>,
    done: bool,
}

impl Iterator for UntracedTransactions<'_> {
    type Item = Result<Vec<Transaction>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let page = match self.store.untraced_transactions_page(
            self.blocks,
            self.cursor.as_deref(),
            self.page_size,
        ) {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if page.len() < self.page_size {
            self.done = true;
        }
        match page.last() {
            Some(last) => {
                self.cursor = Some(last.hash.clone());
                Some(Ok(page))
            }
            None => None,
        }
    }
}

fn decode_transaction(body: &str, trace: Option<bool>) -> Result<Transaction> {
    let mut tx: Transaction =
        serde_json::from_str(body).wrap_err("corrupt transaction document")?;
    tx.trace = trace;
    Ok(tx)
}

/// Numeric suffix of `<parent>.<index>`; malformed ids sort last.
fn trace_index(hash: &str) -> u64 {
    hash.rsplit_once('.')
        .and_then(|(_, index)| index.parse().ok())
        .unwrap_or(u64::MAX)
}
