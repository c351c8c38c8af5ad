//! Leaf executors: sequential heap scan, key-index scan, vector-index scan
//! and the in-memory mock scan used by executor tests.
//!
//! Every scan that touches the heap reconstructs the MVCC-visible version of
//! each slot before emitting it, and records the RID in the transaction's
//! read set (serializable mode tracks it; snapshot isolation ignores it).
//! Index scans re-validate through MVCC because index maintenance is not
//! transactional with the heap.

use super::{Executor, ExecutorContext};
use crate::catalog::{IndexInfo, TableInfo};
use crate::error::DbError;
use crate::index::encode_key;
use crate::plan::{IndexScanNode, MockScanNode, SeqScanNode, VectorIndexScanNode};
use crate::storage::{Rid, TableIter, Tuple};
use crate::types::{Schema, Value};
use eyre::Result;
use std::sync::Arc;

pub struct SeqScanExecutor {
    ctx: ExecutorContext,
    node: SeqScanNode,
    table: Option<Arc<TableInfo>>,
    iter: Option<TableIter>,
}

impl SeqScanExecutor {
    pub fn new(ctx: ExecutorContext, node: SeqScanNode) -> Self {
        Self { ctx, node, table: None, iter: None }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        let table = self
            .ctx
            .catalog
            .table_by_oid(self.node.table_oid)
            .ok_or_else(|| DbError::Execution(format!("no such table: {}", self.node.table_name)))?;
        self.iter = Some(table.heap.iter()?);
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let table = self.table.as_ref().expect("init before next");
        let iter = self.iter.as_mut().expect("init before next");
        while let Some((meta, tuple, rid)) = iter.next()? {
            self.ctx.txn.record_read(rid);
            let Some(visible) =
                self.ctx
                    .txn_mgr
                    .visible_tuple(&table.schema, &meta, &tuple, rid, &self.ctx.txn)?
            else {
                continue;
            };
            if let Some(predicate) = &self.node.predicate {
                let keep = predicate.evaluate(&visible, &table.schema)?.as_bool();
                if keep != Some(true) {
                    continue;
                }
            }
            return Ok(Some((visible, rid)));
        }
        Ok(None)
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

pub struct IndexScanExecutor {
    ctx: ExecutorContext,
    node: IndexScanNode,
    table: Option<Arc<TableInfo>>,
    index: Option<Arc<IndexInfo>>,
    rids: Vec<Rid>,
    pos: usize,
}

impl IndexScanExecutor {
    pub fn new(ctx: ExecutorContext, node: IndexScanNode) -> Self {
        Self { ctx, node, table: None, index: None, rids: Vec::new(), pos: 0 }
    }

    fn resolve_index(&self) -> Result<Arc<IndexInfo>> {
        self.ctx
            .catalog
            .index(&self.node.table_name, &self.node.index_name)
            .ok_or_else(|| {
                DbError::Execution(format!("no such index: {}", self.node.index_name)).into()
            })
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        let table = self
            .ctx
            .catalog
            .table_by_oid(self.node.table_oid)
            .ok_or_else(|| DbError::Execution(format!("no such table: {}", self.node.table_name)))?;
        let index = self.resolve_index()?;
        let key_index = index.key_index().ok_or_else(|| {
            DbError::Execution(format!("index {} is not a key index", index.name))
        })?;
        // A row updated across key values owns one entry per key it ever
        // held, so a full-index walk must deduplicate RIDs.
        let mut seen = hashbrown::HashSet::new();
        self.rids = match &self.node.key {
            Some(values) => key_index.scan_key(&encode_key(values)),
            None => key_index
                .scan_all()
                .into_iter()
                .map(|(_, rid)| rid)
                .filter(|rid| seen.insert(*rid))
                .collect(),
        };
        self.pos = 0;
        self.table = Some(table);
        self.index = Some(index);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let table = self.table.as_ref().expect("init before next");
        let index = self.index.as_ref().expect("init before next");
        while self.pos < self.rids.len() {
            let rid = self.rids[self.pos];
            self.pos += 1;
            self.ctx.txn.record_read(rid);
            let (meta, tuple) = table.heap.get_tuple(rid)?;
            let Some(visible) =
                self.ctx
                    .txn_mgr
                    .visible_tuple(&table.schema, &meta, &tuple, rid, &self.ctx.txn)?
            else {
                continue;
            };
            // Index entries outlive the versions that produced them; the
            // visible version must still carry the probed key.
            if let Some(key_values) = &self.node.key {
                let actual: Vec<_> = index
                    .key_attrs
                    .iter()
                    .map(|&a| visible.value(&table.schema, a))
                    .collect::<Result<_>>()?;
                if &actual != key_values {
                    continue;
                }
            }
            if let Some(predicate) = &self.node.predicate {
                if predicate.evaluate(&visible, &table.schema)?.as_bool() != Some(true) {
                    continue;
                }
            }
            return Ok(Some((visible, rid)));
        }
        Ok(None)
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

pub struct VectorIndexScanExecutor {
    ctx: ExecutorContext,
    node: VectorIndexScanNode,
    table: Option<Arc<TableInfo>>,
    rids: Vec<Rid>,
    pos: usize,
}

impl VectorIndexScanExecutor {
    pub fn new(ctx: ExecutorContext, node: VectorIndexScanNode) -> Self {
        Self { ctx, node, table: None, rids: Vec::new(), pos: 0 }
    }
}

impl Executor for VectorIndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        let table = self
            .ctx
            .catalog
            .table_by_oid(self.node.table_oid)
            .ok_or_else(|| DbError::Execution(format!("no such table: {}", self.node.table_name)))?;
        let index = self
            .ctx
            .catalog
            .index(&self.node.table_name, &self.node.index_name)
            .ok_or_else(|| DbError::Execution(format!("no such index: {}", self.node.index_name)))?;
        let vector_index = index.vector_index().ok_or_else(|| {
            DbError::Execution(format!("index {} is not a vector index", index.name))
        })?;
        // An updated row can surface once per vector it ever held; keep the
        // nearest occurrence only.
        let mut seen = hashbrown::HashSet::new();
        self.rids = vector_index
            .scan_vector_key(&self.node.query, self.node.k)
            .into_iter()
            .filter(|rid| seen.insert(*rid))
            .collect();
        self.pos = 0;
        self.table = Some(table);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let table = self.table.as_ref().expect("init before next");
        while self.pos < self.rids.len() {
            let rid = self.rids[self.pos];
            self.pos += 1;
            self.ctx.txn.record_read(rid);
            let (meta, tuple) = table.heap.get_tuple(rid)?;
            let Some(visible) =
                self.ctx
                    .txn_mgr
                    .visible_tuple(&table.schema, &meta, &tuple, rid, &self.ctx.txn)?
            else {
                continue;
            };
            return Ok(Some((visible, rid)));
        }
        Ok(None)
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

/// Emits a fixed rowset; test scaffolding with no storage behind it.
pub struct MockScanExecutor {
    node: MockScanNode,
    pos: usize,
}

impl MockScanExecutor {
    pub fn new(node: MockScanNode) -> Self {
        Self { node, pos: 0 }
    }
}

impl Executor for MockScanExecutor {
    fn init(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some(row) = self.node.rows.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        let values: &Vec<Value> = row;
        let tuple = Tuple::from_values(values, &self.node.schema)?;
        Ok(Some((tuple, Rid::INVALID)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}
