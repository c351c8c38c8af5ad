//! # QuiverDB — Educational Relational Database with Vector Search
//!
//! QuiverDB accepts a SQL-like dialect, binds and plans queries, optimizes
//! plans with a fixed rule set, and executes them over a paged,
//! buffer-managed heap with secondary indexes (B+Tree, extendible hash,
//! HNSW, IVFFlat). Concurrency control is MVCC with snapshot isolation plus
//! an experimental serializable mode.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Shell (rustyline REPL)        │
//! ├─────────────────────────────────────┤
//! │  SQL Front-End (lexer/parser/binder) │
//! ├─────────────────────────────────────┤
//! │     Optimizer │ Execution Engine     │
//! ├───────────────┼─────────────────────┤
//! │   Catalog     │  MVCC Transactions   │
//! ├───────────────┴─────────────────────┤
//! │  TableHeap │ B+Tree │ Hash │ HNSW/IVF│
//! ├─────────────────────────────────────┤
//! │  BufferPool → DiskManager (pages)    │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use quiverdb::{Database, Session};
//!
//! let db = Database::in_memory()?;
//! let mut session = Session::default();
//! db.execute("CREATE TABLE t(a INTEGER, v VECTOR(3))", &mut session)?;
//! db.execute("INSERT INTO t VALUES (1, [0.1, 0.2, 0.3])", &mut session)?;
//! let top = db.execute("SELECT a FROM t ORDER BY v <-> [0.0, 0.2, 0.3] LIMIT 5", &mut session)?;
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: constants and per-instance session options
//! - [`types`]: `TypeId` / `Value` / `Column` / `Schema`
//! - [`storage`]: disk manager, buffer pool, slotted pages, table heap
//! - [`txn`]: MVCC transaction manager, version chains, watermark, GC
//! - [`catalog`]: tables and indexes by name and OID
//! - [`index`]: B+Tree, extendible hash, reference maps, HNSW, IVFFlat
//! - [`expression`] / [`plan`] / [`optimizer`] / [`execution`]: the query
//!   pipeline
//! - [`recovery`]: best-effort write-ahead-log observer
//! - [`sql`]: lexer, arena AST, parser, binder
//! - [`database`] / [`cli`]: the facade and the interactive shell

#[macro_use]
mod macros;

pub mod catalog;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod execution;
pub mod expression;
pub mod index;
pub mod optimizer;
pub mod plan;
pub mod recovery;
pub mod sql;
pub mod storage;
pub mod txn;
pub mod types;

pub use database::{Database, ExecuteResult, Session};
pub use error::DbError;
