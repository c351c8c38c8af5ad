//! # Database Facade
//!
//! Wires the subsystems together and exposes the statement entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │                 Database                    │
//! ├────────────┬───────────────┬───────────────┤
//! │ SQL front  │  Optimizer    │ ExecutionEngine│
//! ├────────────┴───────┬───────┴───────────────┤
//! │ Catalog            │ TransactionManager     │
//! ├────────────────────┴───────────────────────┤
//! │ TableHeap / Indexes                         │
//! ├────────────────────────────────────────────┤
//! │ BufferPoolManager → DiskManager             │
//! └────────────────────────────────────────────┘
//! ```
//!
//! ## Transactions
//!
//! A [`Session`] carries at most one managed transaction (opened with
//! `BEGIN`, closed with `COMMIT`/`ABORT`). Statements outside a managed
//! transaction run auto-commit: a fresh snapshot per statement, committed on
//! success and aborted on failure. A failed statement inside a managed
//! transaction leaves it for the client to inspect — still RUNNING after an
//! input error, TAINTED after a write conflict.

use crate::catalog::{Catalog, IndexHandle, IndexInfo, IndexSpec, TableInfo};
use crate::config::{SessionConfig, DEFAULT_BUFFER_POOL_FRAMES};
use crate::error::DbError;
use crate::execution::{ExecutionEngine, ExecutorContext};
use crate::index::encode_key;
use crate::optimizer::optimize;
use crate::recovery::{LogManager, LogRecord};
use crate::sql::{bind_statement, parse_statement, Command};
use crate::storage::{BufferPoolManager, DiskManager};
use crate::txn::{IsolationLevel, Transaction, TransactionManager, TransactionState, Ts};
use crate::types::{Schema, Value};
use bumpalo::Bump;
use eyre::{ensure, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct Database {
    bpm: Arc<BufferPoolManager>,
    catalog: Arc<Catalog>,
    txn_mgr: Arc<TransactionManager>,
    config: Arc<SessionConfig>,
    log: Arc<LogManager>,
}

/// One client's statement context: its managed transaction, if any.
#[derive(Default)]
pub struct Session {
    pub txn: Option<Arc<Transaction>>,
}

/// The outcome of one statement.
#[derive(Debug)]
pub struct ExecuteResult {
    /// Column layout of `rows`; `None` for command statements.
    pub schema: Option<Schema>,
    pub rows: Vec<Vec<Value>>,
    /// Human-readable status for command statements and EXPLAIN.
    pub message: Option<String>,
}

impl ExecuteResult {
    fn message(text: impl Into<String>) -> Self {
        Self { schema: None, rows: Vec::new(), message: Some(text.into()) }
    }
}

impl Database {
    /// Opens (or creates) a database at `path`; the write-ahead log lands
    /// next to it with a `.wal` suffix.
    pub fn open(path: impl AsRef<Path>) -> Result<Database> {
        let path = path.as_ref();
        let disk = DiskManager::open(path)?;
        let wal = path.with_extension("wal");
        Self::build(disk, Some(wal))
    }

    /// A volatile instance for tests and the `:memory:` shell target.
    pub fn in_memory() -> Result<Database> {
        Self::build(DiskManager::in_memory(), None)
    }

    fn build(disk: DiskManager, wal: Option<std::path::PathBuf>) -> Result<Database> {
        let config = Arc::new(SessionConfig::new());
        let bpm = BufferPoolManager::new(DEFAULT_BUFFER_POOL_FRAMES, disk);
        let catalog = Arc::new(Catalog::new(Arc::clone(&bpm), Arc::clone(&config)));
        let txn_mgr = Arc::new(TransactionManager::new());
        txn_mgr.wire_catalog(Arc::clone(&catalog));
        let log = LogManager::start(wal, Arc::clone(&config))?;
        info!("database ready");
        Ok(Database { bpm, catalog, txn_mgr, config, log })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_mgr
    }

    pub fn config(&self) -> &Arc<SessionConfig> {
        &self.config
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    // ------------------------------------------------------------------
    // Transaction control
    // ------------------------------------------------------------------

    pub fn begin(&self, serializable: bool) -> Arc<Transaction> {
        let isolation = if serializable {
            IsolationLevel::Serializable
        } else {
            IsolationLevel::SnapshotIsolation
        };
        let txn = self.txn_mgr.begin(isolation);
        self.log.append(&LogRecord::Begin { txn: txn.id() });
        txn
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<Ts> {
        let commit_ts = self.txn_mgr.commit(txn)?;
        self.log.append(&LogRecord::Commit { txn: txn.id(), commit_ts });
        Ok(commit_ts)
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.txn_mgr.abort(txn)?;
        self.log.append(&LogRecord::Abort { txn: txn.id() });
        Ok(())
    }

    pub fn garbage_collect(&self) -> Result<()> {
        self.txn_mgr.garbage_collect()
    }

    /// Version-chain dump for one table (`\dbgmvcc`).
    pub fn dump_version_chains(&self, table: &str) -> Result<String> {
        let info = self
            .catalog
            .table(table)
            .ok_or_else(|| DbError::InvalidInput(format!("no such table: {table}")))?;
        self.txn_mgr.dump_table(&info)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parses, binds, plans, optimizes and executes one statement in the
    /// given session.
    pub fn execute(&self, sql: &str, session: &mut Session) -> Result<ExecuteResult> {
        let arena = Bump::new();
        let stmt = parse_statement(sql, &arena)?;
        let command = bind_statement(&stmt, &self.catalog)?;

        match command {
            Command::CreateTable { name, columns, primary_key } => {
                self.catalog.create_table(&name, Schema::new(columns))?;
                if let Some(pk) = primary_key {
                    let index_name = format!("{name}_pkey");
                    self.catalog.create_index(&index_name, &name, vec![pk], IndexSpec::BTree)?;
                }
                Ok(ExecuteResult::message(format!("Table {name} created.")))
            }
            Command::CreateIndex { name, table, key_attrs, spec } => {
                let index = self.catalog.create_index(&name, &table, key_attrs, spec)?;
                let info = self
                    .catalog
                    .table(&table)
                    .ok_or_else(|| DbError::Execution(format!("table {table} vanished")))?;
                self.populate_index(&info, &index)?;
                Ok(ExecuteResult::message(format!("Index {name} created.")))
            }
            Command::Begin { serializable } => {
                ensure!(
                    session.txn.is_none(),
                    DbError::InvalidInput("already inside a transaction".into())
                );
                let txn = self.begin(serializable);
                let message = format!(
                    "BEGIN txn{}{}",
                    txn.seq(),
                    if serializable { " (serializable)" } else { "" }
                );
                session.txn = Some(txn);
                Ok(ExecuteResult::message(message))
            }
            Command::Commit => {
                let txn = session
                    .txn
                    .clone()
                    .ok_or_else(|| DbError::InvalidInput("no transaction in progress".into()))?;
                // A failed commit (tainted, serializable rejection) keeps the
                // transaction attached so the client can still ABORT it.
                let commit_ts = self.commit(&txn)?;
                session.txn = None;
                Ok(ExecuteResult::message(format!("COMMIT at ts {commit_ts}")))
            }
            Command::Abort => {
                let txn = session
                    .txn
                    .take()
                    .ok_or_else(|| DbError::InvalidInput("no transaction in progress".into()))?;
                self.abort(&txn)?;
                Ok(ExecuteResult::message("ABORT"))
            }
            Command::Set { name, value } => {
                self.config.set(&name, &value)?;
                Ok(ExecuteResult::message(format!("SET {name} = {value}")))
            }
            Command::Show { name } => {
                let value = self.config.show(&name)?;
                Ok(ExecuteResult::message(format!("{name} = {value}")))
            }
            Command::Explain(plan) => {
                let optimized = optimize(plan, &self.catalog);
                Ok(ExecuteResult::message(optimized.to_string()))
            }
            Command::Query(plan) => self.run_query(plan, session),
        }
    }

    fn run_query(
        &self,
        plan: Arc<crate::plan::PlanNode>,
        session: &mut Session,
    ) -> Result<ExecuteResult> {
        let plan = optimize(plan, &self.catalog);

        let (txn, auto_commit) = match &session.txn {
            Some(txn) => {
                ensure!(
                    txn.state() == TransactionState::Running,
                    DbError::Execution(format!(
                        "transaction txn{} is {}; issue ABORT",
                        txn.seq(),
                        txn.state()
                    ))
                );
                (Arc::clone(txn), false)
            }
            None => (self.begin(false), true),
        };

        let ctx = ExecutorContext::new(
            Arc::clone(&self.bpm),
            Arc::clone(&self.catalog),
            Arc::clone(&txn),
            Arc::clone(&self.txn_mgr),
            Arc::clone(&self.config),
            Arc::clone(&self.log),
        );

        match ExecutionEngine::execute(&plan, &ctx) {
            Ok(tuples) => {
                let schema = plan.output_schema().clone();
                let rows = tuples
                    .iter()
                    .map(|t| t.values(&schema))
                    .collect::<Result<Vec<_>>>()?;
                if auto_commit {
                    self.commit(&txn)?;
                }
                Ok(ExecuteResult { schema: Some(schema), rows, message: None })
            }
            Err(err) => {
                if auto_commit {
                    // Roll back the statement's own snapshot; the original
                    // failure is the interesting error.
                    let _ = self.abort(&txn);
                }
                Err(err)
            }
        }
    }

    /// Backfills a fresh index from the table's committed contents, visible
    /// at a throwaway snapshot.
    fn populate_index(&self, table: &TableInfo, index: &IndexInfo) -> Result<()> {
        let txn = self.txn_mgr.begin(IsolationLevel::SnapshotIsolation);
        let result = self.populate_index_inner(table, index, &txn);
        let _ = self.txn_mgr.abort(&txn);
        result
    }

    fn populate_index_inner(
        &self,
        table: &TableInfo,
        index: &IndexInfo,
        txn: &Arc<Transaction>,
    ) -> Result<()> {
        let mut iter = table.heap.eager_iter();
        let mut vectors = Vec::new();
        while let Some((meta, tuple, rid)) = iter.next()? {
            let Some(visible) =
                self.txn_mgr.visible_tuple(&table.schema, &meta, &tuple, rid, txn)?
            else {
                continue;
            };
            match &index.handle {
                IndexHandle::Key(key_index) => {
                    let key: Vec<Value> = index
                        .key_attrs
                        .iter()
                        .map(|&a| visible.value(&table.schema, a))
                        .collect::<Result<_>>()?;
                    key_index.insert_entry(&encode_key(&key), rid);
                }
                IndexHandle::Vector(_) => {
                    if let Value::Vector(v) = visible.value(&table.schema, index.key_attrs[0])? {
                        vectors.push((v, rid));
                    }
                }
            }
        }
        if let IndexHandle::Vector(vector_index) = &index.handle {
            vector_index.build(&vectors);
        }
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.log.stop();
        let _ = self.bpm.flush_all();
    }
}
