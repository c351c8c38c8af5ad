//! # Error Taxonomy
//!
//! Every fallible path in QuiverDB returns `eyre::Result`; this module defines
//! the typed `DbError` kinds embedded in those reports so boundaries that care
//! about the *kind* of failure (the execution engine, the session layer) can
//! downcast instead of string-matching.
//!
//! ## Kinds
//!
//! - `NotImplemented`: feature intentionally absent. Reported verbatim, never
//!   retried.
//! - `InvalidInput`: parse/bind failure, schema or type mismatch. Aborts the
//!   statement; the transaction may continue.
//! - `Execution`: runtime failure inside an executor (divide by zero,
//!   oversized tuple). Aborts the statement.
//! - `WriteConflict`: a write-write conflict was detected and the transaction
//!   has been tainted. The session is expected to issue ABORT.
//! - `Io`: disk or buffer-pool failure. Typically fatal to the statement.
//!
//! Invariant violations are not errors; they are `debug_assert!` /
//! `unreachable!` and crash loudly.

use crate::storage::Rid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("write-write conflict on tuple {rid}: transaction is tainted and must abort")]
    WriteConflict { rid: Rid },

    #[error("io error: {0}")]
    Io(String),
}

impl DbError {
    /// True if this error tainted the transaction (the session must ABORT).
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, DbError::WriteConflict { .. })
    }
}

/// Looks through an `eyre` report for a typed [`DbError`].
pub fn db_error(report: &eyre::Report) -> Option<&DbError> {
    report.downcast_ref::<DbError>()
}

/// True if the report carries a write conflict (tainted transaction).
pub fn is_write_conflict(report: &eyre::Report) -> bool {
    db_error(report).is_some_and(DbError::is_write_conflict)
}
