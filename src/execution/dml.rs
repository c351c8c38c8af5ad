//! Mutating executors: INSERT, UPDATE, DELETE.
//!
//! ## The versioned write
//!
//! Every mutation of an existing slot runs under the page write latch
//! through `TableHeap::update_tuple_in_place` with a check closure that:
//!
//! 1. detects write-write conflicts against the slot's current stamp
//!    (another live transaction's pending id, or a commit newer than our
//!    snapshot) — on conflict the write is vetoed, the transaction tainted
//!    and `WriteConflict` returned;
//! 2. creates the undo entry on this transaction's first write to the slot
//!    (a partial-column patch restoring the snapshot image; full row for
//!    deletes; "prior was absent" for inserts), or merges newly modified
//!    columns into the existing entry on repeat writes — one undo entry per
//!    (transaction, RID), ever;
//! 3. installs the new chain head in the version-link table.
//!
//! Only after the closure passes is the slot overwritten with the new
//! payload and the transaction's pending stamp.
//!
//! ## Index maintenance
//!
//! Inserts add entries to every table index. Updates add entries under the
//! new key and keep the old ones; deletes keep everything. Stale entries are
//! harmless because readers re-validate through MVCC (and re-check the
//! probed key), and removing them would strip older snapshots of their only
//! index path.

use super::{Executor, ExecutorContext};
use crate::catalog::{IndexHandle, IndexInfo, TableInfo};
use crate::error::DbError;
use crate::index::encode_key;
use crate::plan::{DeleteNode, InsertNode, UpdateNode};
use crate::recovery::LogRecord;
use crate::storage::{Rid, TupleMeta, Tuple};
use crate::txn::version::partial_schema;
use crate::txn::{write_conflicts, UndoLink, UndoLog};
use crate::types::{Schema, Value};
use eyre::{ensure, Result};
use std::sync::Arc;

/// Outcome of a versioned write against one slot.
#[derive(Debug, PartialEq, Eq)]
enum WriteOutcome {
    Applied,
    /// The slot is already deleted by this same transaction; the statement
    /// skips it silently (its scan snapshot predates the self-delete).
    Skipped,
}

fn resolve_table(ctx: &ExecutorContext, oid: u32, name: &str) -> Result<Arc<TableInfo>> {
    ctx.catalog
        .table_by_oid(oid)
        .ok_or_else(|| DbError::Execution(format!("no such table: {name}")).into())
}

fn index_key_values(info: &IndexInfo, tuple: &Tuple, schema: &Schema) -> Result<Vec<Value>> {
    info.key_attrs.iter().map(|&a| tuple.value(schema, a)).collect()
}

fn insert_into_indexes(
    ctx: &ExecutorContext,
    table: &TableInfo,
    tuple: &Tuple,
    rid: Rid,
) -> Result<()> {
    for info in ctx.catalog.table_indexes(&table.name) {
        match &info.handle {
            IndexHandle::Key(index) => {
                let key = index_key_values(&info, tuple, &table.schema)?;
                index.insert_entry(&encode_key(&key), rid);
            }
            IndexHandle::Vector(index) => {
                if let Value::Vector(v) = tuple.value(&table.schema, info.key_attrs[0])? {
                    index.insert_entry(&v, rid);
                }
            }
        }
    }
    Ok(())
}

/// Adds entries for keys the update changed; the old entries stay so older
/// snapshots keep their index path.
fn reindex_changed_keys(
    ctx: &ExecutorContext,
    table: &TableInfo,
    old: &Tuple,
    new: &Tuple,
    rid: Rid,
) -> Result<()> {
    for info in ctx.catalog.table_indexes(&table.name) {
        let old_key = index_key_values(&info, old, &table.schema)?;
        let new_key = index_key_values(&info, new, &table.schema)?;
        if old_key == new_key {
            continue;
        }
        match &info.handle {
            IndexHandle::Key(index) => index.insert_entry(&encode_key(&new_key), rid),
            IndexHandle::Vector(index) => {
                if let Value::Vector(v) = &new_key[0] {
                    index.insert_entry(v, rid);
                }
            }
        }
    }
    Ok(())
}

/// First-write undo entry: the patch that restores the pre-write image.
fn make_patch(
    schema: &Schema,
    old_meta: &TupleMeta,
    old_tuple: &Tuple,
    new_tuple: &Tuple,
    delete: bool,
) -> Result<UndoLog> {
    let old_values = old_tuple.values(schema)?;
    let (modified, kept): (Vec<bool>, Vec<Value>) = if delete {
        (vec![true; schema.len()], old_values)
    } else {
        let new_values = new_tuple.values(schema)?;
        let modified: Vec<bool> = old_values
            .iter()
            .zip(new_values.iter())
            .map(|(o, n)| o != n)
            .collect();
        let kept = old_values
            .into_iter()
            .zip(modified.iter())
            .filter_map(|(v, &m)| m.then_some(v))
            .collect();
        (modified, kept)
    };
    let patch = Tuple::from_values(&kept, &partial_schema(schema, &modified))?;
    Ok(UndoLog {
        is_deleted: old_meta.is_deleted(),
        modified_fields: modified,
        tuple: patch,
        ts: old_meta.ts(),
        prev_version: UndoLink::INVALID,
    })
}

/// Repeat-write merge: extend the existing patch with columns this write
/// touches for the first time, valued from the pre-write heap image (which
/// still carries the snapshot values for columns we never modified).
/// Returns `None` when the patch already covers everything.
fn merge_patch(
    schema: &Schema,
    log: &UndoLog,
    old_tuple: &Tuple,
    new_tuple: &Tuple,
) -> Result<Option<UndoLog>> {
    let old_values = old_tuple.values(schema)?;
    let new_values = new_tuple.values(schema)?;
    let newly: Vec<bool> = (0..schema.len())
        .map(|i| !log.modified_fields[i] && old_values[i] != new_values[i])
        .collect();
    if !newly.iter().any(|&m| m) {
        return Ok(None);
    }

    let old_patch_schema = partial_schema(schema, &log.modified_fields);
    let mut patch_values = Vec::new();
    let mut modified = vec![false; schema.len()];
    let mut old_patch_idx = 0usize;
    for i in 0..schema.len() {
        if log.modified_fields[i] {
            modified[i] = true;
            patch_values.push(log.tuple.value(&old_patch_schema, old_patch_idx)?);
            old_patch_idx += 1;
        } else if newly[i] {
            modified[i] = true;
            patch_values.push(old_values[i].clone());
        }
    }
    let patch = Tuple::from_values(&patch_values, &partial_schema(schema, &modified))?;
    Ok(Some(UndoLog {
        is_deleted: log.is_deleted,
        modified_fields: modified,
        tuple: patch,
        ts: log.ts,
        prev_version: log.prev_version,
    }))
}

/// The shared UPDATE/DELETE slot write; see the module docs for the
/// protocol.
fn apply_versioned_write(
    ctx: &ExecutorContext,
    table: &TableInfo,
    rid: Rid,
    payload: &Tuple,
    delete: bool,
) -> Result<WriteOutcome> {
    let txn = &ctx.txn;
    let mgr = &ctx.txn_mgr;
    let schema = &table.schema;

    let mut conflicted = false;
    let mut skipped = false;
    let mut patch_err: Option<eyre::Report> = None;

    let new_meta = TupleMeta::new(txn.id(), delete);
    table.heap.update_tuple_in_place(
        new_meta,
        payload,
        rid,
        Some(&mut |old_meta: &TupleMeta, old_tuple: &Tuple, rid: Rid| {
            if write_conflicts(old_meta.ts(), txn) {
                conflicted = true;
                return false;
            }
            if old_meta.ts() == txn.id() && old_meta.is_deleted() {
                skipped = true;
                return false;
            }

            let link = mgr.version_link(rid);
            match link.filter(|l| l.prev_txn == txn.id()) {
                Some(own) => {
                    // Repeat write: at most one undo entry per RID, so the
                    // existing patch absorbs the newly touched columns. An
                    // insert entry ("prior absent") already dominates.
                    if let Some(log) = txn.undo_log(own.prev_log_idx as usize) {
                        if !log.is_deleted && !delete {
                            match merge_patch(schema, &log, old_tuple, payload) {
                                Ok(Some(merged)) => {
                                    txn.modify_undo_log(own.prev_log_idx as usize, merged);
                                }
                                Ok(None) => {}
                                Err(err) => {
                                    patch_err = Some(err);
                                    return false;
                                }
                            }
                        }
                    }
                }
                None => {
                    debug_assert_ne!(old_meta.ts(), txn.id());
                    match make_patch(schema, old_meta, old_tuple, payload, delete) {
                        Ok(mut log) => {
                            log.prev_version = link.unwrap_or(UndoLink::INVALID);
                            let head = txn.append_undo_log(log);
                            mgr.set_version_link(rid, Some(head));
                        }
                        Err(err) => {
                            patch_err = Some(err);
                            return false;
                        }
                    }
                }
            }
            true
        }),
    )?;

    if let Some(err) = patch_err {
        return Err(err);
    }
    if conflicted {
        mgr.taint(txn);
        return Err(DbError::WriteConflict { rid }.into());
    }
    if skipped {
        return Ok(WriteOutcome::Skipped);
    }
    txn.record_write(table.oid, rid);
    Ok(WriteOutcome::Applied)
}

fn count_tuple(schema: &Schema, count: i32) -> Result<Tuple> {
    Tuple::from_values(&[Value::Integer(count)], schema)
}

// ----------------------------------------------------------------------
// INSERT
// ----------------------------------------------------------------------

pub struct InsertExecutor {
    ctx: ExecutorContext,
    node: InsertNode,
    child: Box<dyn Executor>,
    done: bool,
}

impl InsertExecutor {
    pub fn new(ctx: ExecutorContext, node: InsertNode, child: Box<dyn Executor>) -> Self {
        Self { ctx, node, child, done: false }
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<()> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let table = resolve_table(&self.ctx, self.node.table_oid, &self.node.table_name)?;
        let txn = &self.ctx.txn;

        let mut count = 0i32;
        while let Some((tuple, _)) = self.child.next()? {
            ensure!(
                tuple.values(&table.schema).is_ok(),
                DbError::Execution(format!(
                    "row does not match schema of table {}",
                    table.name
                ))
            );
            let meta = TupleMeta::new(txn.id(), false);
            let rid = table.heap.insert_tuple(meta, &tuple)?;

            // "Prior was absent": rolling this entry back re-tombstones the
            // fresh slot.
            let head = txn.append_undo_log(UndoLog {
                is_deleted: true,
                modified_fields: vec![false; table.schema.len()],
                tuple: Tuple::empty(),
                ts: 0,
                prev_version: UndoLink::INVALID,
            });
            self.ctx.txn_mgr.set_version_link(rid, Some(head));
            txn.record_write(table.oid, rid);
            insert_into_indexes(&self.ctx, &table, &tuple, rid)?;
            self.ctx.log.append(&LogRecord::Insert { table_oid: table.oid, rid });
            count += 1;
        }
        Ok(Some((count_tuple(&self.node.schema, count)?, Rid::INVALID)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

// ----------------------------------------------------------------------
// UPDATE
// ----------------------------------------------------------------------

pub struct UpdateExecutor {
    ctx: ExecutorContext,
    node: UpdateNode,
    child: Box<dyn Executor>,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(ctx: ExecutorContext, node: UpdateNode, child: Box<dyn Executor>) -> Self {
        Self { ctx, node, child, done: false }
    }
}

impl Executor for UpdateExecutor {
    fn init(&mut self) -> Result<()> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let table = resolve_table(&self.ctx, self.node.table_oid, &self.node.table_name)?;

        // Materialize targets first so the write phase never races the scan
        // cursor over its own updates.
        let mut targets = Vec::new();
        while let Some(pair) = self.child.next()? {
            targets.push(pair);
        }

        let mut count = 0i32;
        for (old_tuple, rid) in targets {
            let mut new_values = Vec::with_capacity(table.schema.len());
            for (i, expr) in self.node.target_expressions.iter().enumerate() {
                let value = expr.evaluate(&old_tuple, &table.schema)?;
                new_values.push(value.cast_to(table.schema.column(i).type_id())?);
            }
            let new_tuple = Tuple::from_values(&new_values, &table.schema)?;

            match apply_versioned_write(&self.ctx, &table, rid, &new_tuple, false)? {
                WriteOutcome::Applied => {
                    reindex_changed_keys(&self.ctx, &table, &old_tuple, &new_tuple, rid)?;
                    self.ctx.log.append(&LogRecord::Update { table_oid: table.oid, rid });
                    count += 1;
                }
                WriteOutcome::Skipped => {}
            }
        }
        Ok(Some((count_tuple(&self.node.schema, count)?, Rid::INVALID)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

// ----------------------------------------------------------------------
// DELETE
// ----------------------------------------------------------------------

pub struct DeleteExecutor {
    ctx: ExecutorContext,
    node: DeleteNode,
    child: Box<dyn Executor>,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(ctx: ExecutorContext, node: DeleteNode, child: Box<dyn Executor>) -> Self {
        Self { ctx, node, child, done: false }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<()> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let table = resolve_table(&self.ctx, self.node.table_oid, &self.node.table_name)?;

        let mut targets = Vec::new();
        while let Some(pair) = self.child.next()? {
            targets.push(pair);
        }

        let mut count = 0i32;
        for (old_tuple, rid) in targets {
            // The payload is kept under the tombstone so the chain patch can
            // restore it; index entries stay for older snapshots.
            match apply_versioned_write(&self.ctx, &table, rid, &old_tuple, true)? {
                WriteOutcome::Applied => {
                    self.ctx.log.append(&LogRecord::Delete { table_oid: table.oid, rid });
                    count += 1;
                }
                WriteOutcome::Skipped => {}
            }
        }
        Ok(Some((count_tuple(&self.node.schema, count)?, Rid::INVALID)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}
