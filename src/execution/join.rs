//! Join executors: nested loop, hash, and index nested loop.
//!
//! All three produce the concatenation of left and right columns under the
//! plan's output schema; LEFT joins pad unmatched outer tuples with typed
//! NULLs. Join keys that evaluate to NULL never match (SQL semantics), which
//! the hash join enforces before probing its table.

use super::{Executor, ExecutorContext};
use crate::catalog::TableInfo;
use crate::error::DbError;
use crate::index::encode_key;
use crate::plan::{HashJoinNode, JoinType, NestedIndexJoinNode, NestedLoopJoinNode};
use crate::storage::{Rid, Tuple};
use crate::types::{Schema, TypeId, Value};
use eyre::Result;
use hashbrown::HashMap;
use std::sync::Arc;

fn null_row(schema: &Schema) -> Vec<Value> {
    schema
        .columns()
        .iter()
        .map(|c| Value::Null(c.type_id()))
        .collect()
}

fn join_tuple(
    out_schema: &Schema,
    left: &Tuple,
    left_schema: &Schema,
    right: Option<(&Tuple, &Schema)>,
    right_schema_for_nulls: &Schema,
) -> Result<Tuple> {
    let mut values = left.values(left_schema)?;
    match right {
        Some((tuple, schema)) => values.extend(tuple.values(schema)?),
        None => values.extend(null_row(right_schema_for_nulls)),
    }
    Tuple::from_values(&values, out_schema)
}

// ----------------------------------------------------------------------
// Nested loop join
// ----------------------------------------------------------------------

pub struct NestedLoopJoinExecutor {
    node: NestedLoopJoinNode,
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_schema: Schema,
    right_schema: Schema,
    /// Inner side, materialized once at init; rescans serve from here.
    right_rows: Vec<Tuple>,
    current_left: Option<Tuple>,
    right_pos: usize,
    matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        node: NestedLoopJoinNode,
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
    ) -> Self {
        let left_schema = left.schema().clone();
        let right_schema = right.schema().clone();
        Self {
            node,
            left,
            right,
            left_schema,
            right_schema,
            right_rows: Vec::new(),
            current_left: None,
            right_pos: 0,
            matched: false,
        }
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.left.init()?;
        self.right.init()?;
        self.right_rows.clear();
        while let Some((tuple, _)) = self.right.next()? {
            self.right_rows.push(tuple);
        }
        self.current_left = None;
        self.right_pos = 0;
        self.matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        loop {
            if self.current_left.is_none() {
                match self.left.next()? {
                    Some((tuple, _)) => {
                        self.current_left = Some(tuple);
                        self.right_pos = 0;
                        self.matched = false;
                        // Rescan contract: the inner side restarts for every
                        // outer tuple; results come from the materialized
                        // copy.
                        self.right.init()?;
                    }
                    None => return Ok(None),
                }
            }
            let left = self.current_left.as_ref().unwrap();

            while self.right_pos < self.right_rows.len() {
                let right = &self.right_rows[self.right_pos];
                self.right_pos += 1;
                let accept = match &self.node.predicate {
                    Some(p) => {
                        p.evaluate_join(left, &self.left_schema, right, &self.right_schema)?
                            .as_bool()
                            == Some(true)
                    }
                    None => true,
                };
                if accept {
                    self.matched = true;
                    let out = join_tuple(
                        &self.node.schema,
                        left,
                        &self.left_schema,
                        Some((right, &self.right_schema)),
                        &self.right_schema,
                    )?;
                    return Ok(Some((out, Rid::INVALID)));
                }
            }

            let emit_padded = self.node.join_type == JoinType::Left && !self.matched;
            let left = self.current_left.take().unwrap();
            if emit_padded {
                let out = join_tuple(
                    &self.node.schema,
                    &left,
                    &self.left_schema,
                    None,
                    &self.right_schema,
                )?;
                return Ok(Some((out, Rid::INVALID)));
            }
        }
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

// ----------------------------------------------------------------------
// Hash join
// ----------------------------------------------------------------------

pub struct HashJoinExecutor {
    node: HashJoinNode,
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_schema: Schema,
    right_schema: Schema,
    table: HashMap<Vec<u8>, Vec<Tuple>>,
    current_left: Option<Tuple>,
    matches: Vec<Tuple>,
    match_pos: usize,
    matched: bool,
}

impl HashJoinExecutor {
    pub fn new(node: HashJoinNode, left: Box<dyn Executor>, right: Box<dyn Executor>) -> Self {
        let left_schema = left.schema().clone();
        let right_schema = right.schema().clone();
        Self {
            node,
            left,
            right,
            left_schema,
            right_schema,
            table: HashMap::new(),
            current_left: None,
            matches: Vec::new(),
            match_pos: 0,
            matched: false,
        }
    }

    fn key_bytes(exprs: &[crate::expression::Expression], tuple: &Tuple, schema: &Schema) -> Result<Option<Vec<u8>>> {
        let mut values = Vec::with_capacity(exprs.len());
        for e in exprs {
            let v = e.evaluate(tuple, schema)?;
            if v.is_null() {
                return Ok(None);
            }
            values.push(v);
        }
        Ok(Some(encode_key(&values)))
    }
}

impl Executor for HashJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.right.init()?;
        self.table.clear();
        while let Some((tuple, _)) = self.right.next()? {
            if let Some(key) = Self::key_bytes(&self.node.right_keys, &tuple, &self.right_schema)? {
                self.table.entry(key).or_default().push(tuple);
            }
        }
        self.left.init()?;
        self.current_left = None;
        self.matches.clear();
        self.match_pos = 0;
        self.matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        loop {
            if let Some(left) = &self.current_left {
                if self.match_pos < self.matches.len() {
                    let right = self.matches[self.match_pos].clone();
                    self.match_pos += 1;
                    self.matched = true;
                    let out = join_tuple(
                        &self.node.schema,
                        left,
                        &self.left_schema,
                        Some((&right, &self.right_schema)),
                        &self.right_schema,
                    )?;
                    return Ok(Some((out, Rid::INVALID)));
                }
                let emit_padded = self.node.join_type == JoinType::Left && !self.matched;
                let left = self.current_left.take().unwrap();
                if emit_padded {
                    let out = join_tuple(
                        &self.node.schema,
                        &left,
                        &self.left_schema,
                        None,
                        &self.right_schema,
                    )?;
                    return Ok(Some((out, Rid::INVALID)));
                }
                continue;
            }

            match self.left.next()? {
                Some((tuple, _)) => {
                    self.matches = match Self::key_bytes(&self.node.left_keys, &tuple, &self.left_schema)? {
                        Some(key) => self.table.get(&key).cloned().unwrap_or_default(),
                        None => Vec::new(),
                    };
                    self.match_pos = 0;
                    self.matched = false;
                    self.current_left = Some(tuple);
                }
                None => return Ok(None),
            }
        }
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

// ----------------------------------------------------------------------
// Index nested loop join
// ----------------------------------------------------------------------

pub struct NestedIndexJoinExecutor {
    ctx: ExecutorContext,
    node: NestedIndexJoinNode,
    left: Box<dyn Executor>,
    left_schema: Schema,
    inner: Option<Arc<TableInfo>>,
    inner_schema: Schema,
    pending: Vec<Tuple>,
    pending_pos: usize,
    current_left: Option<Tuple>,
}

impl NestedIndexJoinExecutor {
    pub fn new(ctx: ExecutorContext, node: NestedIndexJoinNode, left: Box<dyn Executor>) -> Self {
        let left_schema = left.schema().clone();
        Self {
            ctx,
            node,
            left,
            left_schema,
            inner: None,
            inner_schema: Schema::new(Vec::new()),
            pending: Vec::new(),
            pending_pos: 0,
            current_left: None,
        }
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> Result<()> {
        let table = self
            .ctx
            .catalog
            .table_by_oid(self.node.inner_table_oid)
            .ok_or_else(|| {
                DbError::Execution(format!("no such table: {}", self.node.inner_table_name))
            })?;
        self.inner_schema = table.schema.clone();
        self.inner = Some(table);
        self.left.init()?;
        self.pending.clear();
        self.pending_pos = 0;
        self.current_left = None;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        loop {
            if let Some(left) = &self.current_left {
                if self.pending_pos < self.pending.len() {
                    let right = self.pending[self.pending_pos].clone();
                    self.pending_pos += 1;
                    let out = join_tuple(
                        &self.node.schema,
                        left,
                        &self.left_schema,
                        Some((&right, &self.inner_schema)),
                        &self.inner_schema,
                    )?;
                    return Ok(Some((out, Rid::INVALID)));
                }
                let emit_padded = self.node.join_type == JoinType::Left && self.pending.is_empty();
                let left = self.current_left.take().unwrap();
                if emit_padded {
                    let out = join_tuple(
                        &self.node.schema,
                        &left,
                        &self.left_schema,
                        None,
                        &self.inner_schema,
                    )?;
                    return Ok(Some((out, Rid::INVALID)));
                }
                continue;
            }

            let Some((left, _)) = self.left.next()? else {
                return Ok(None);
            };
            let table = self.inner.as_ref().expect("init before next");
            let index = self
                .ctx
                .catalog
                .index(&self.node.inner_table_name, &self.node.index_name)
                .ok_or_else(|| {
                    DbError::Execution(format!("no such index: {}", self.node.index_name))
                })?;
            let key_index = index.key_index().ok_or_else(|| {
                DbError::Execution(format!("index {} is not a key index", index.name))
            })?;

            self.pending.clear();
            self.pending_pos = 0;
            let key = self.node.key_expression.evaluate(&left, &self.left_schema)?;
            if !key.is_null() {
                let key_values = vec![key];
                for rid in key_index.scan_key(&encode_key(&key_values)) {
                    self.ctx.txn.record_read(rid);
                    let (meta, tuple) = table.heap.get_tuple(rid)?;
                    let Some(visible) = self.ctx.txn_mgr.visible_tuple(
                        &table.schema,
                        &meta,
                        &tuple,
                        rid,
                        &self.ctx.txn,
                    )?
                    else {
                        continue;
                    };
                    // Stale index entries: the visible version must still
                    // carry the probed key.
                    let actual = index_key_value(&index.key_attrs, &visible, &table.schema)?;
                    if actual == key_values[0] {
                        self.pending.push(visible);
                    }
                }
            }
            self.current_left = Some(left);
        }
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

fn index_key_value(key_attrs: &[usize], tuple: &Tuple, schema: &Schema) -> Result<Value> {
    debug_assert_eq!(key_attrs.len(), 1);
    tuple.value(schema, key_attrs[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::scan::MockScanExecutor;
    use crate::expression::{ComparisonOp, Expression};
    use crate::plan::MockScanNode;
    use crate::types::Column;

    fn mock(rows: Vec<Vec<Value>>, cols: Vec<Column>) -> Box<dyn Executor> {
        Box::new(MockScanExecutor::new(MockScanNode { schema: Schema::new(cols), rows }))
    }

    fn int_rows(values: &[i32]) -> Vec<Vec<Value>> {
        values.iter().map(|&v| vec![Value::Integer(v)]).collect()
    }

    fn join_node(join_type: JoinType, predicate: Option<Expression>) -> NestedLoopJoinNode {
        NestedLoopJoinNode {
            schema: Schema::new(vec![
                Column::new("l", TypeId::Integer),
                Column::new("r", TypeId::Integer),
            ]),
            left: mock_plan(),
            right: mock_plan(),
            predicate,
            join_type,
        }
    }

    fn mock_plan() -> Arc<crate::plan::PlanNode> {
        Arc::new(crate::plan::PlanNode::MockScan(MockScanNode {
            schema: Schema::new(vec![Column::new("x", TypeId::Integer)]),
            rows: Vec::new(),
        }))
    }

    fn eq_predicate() -> Expression {
        Expression::comparison(
            ComparisonOp::Eq,
            Expression::column(0, 0, Column::new("l", TypeId::Integer)),
            Expression::column(1, 0, Column::new("r", TypeId::Integer)),
        )
    }

    fn drain(mut exec: impl Executor) -> Vec<Vec<Value>> {
        exec.init().unwrap();
        let mut out = Vec::new();
        while let Some((tuple, _)) = exec.next().unwrap() {
            out.push(tuple.values(exec.schema()).unwrap());
        }
        out
    }

    #[test]
    fn inner_nlj_matches_equal_keys() {
        let cols = vec![Column::new("x", TypeId::Integer)];
        let exec = NestedLoopJoinExecutor::new(
            join_node(JoinType::Inner, Some(eq_predicate())),
            mock(int_rows(&[1, 2, 3]), cols.clone()),
            mock(int_rows(&[2, 3, 4]), cols),
        );
        let rows = drain(exec);
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(2), Value::Integer(2)],
                vec![Value::Integer(3), Value::Integer(3)],
            ]
        );
    }

    #[test]
    fn left_nlj_pads_unmatched_outer_rows() {
        let cols = vec![Column::new("x", TypeId::Integer)];
        let exec = NestedLoopJoinExecutor::new(
            join_node(JoinType::Left, Some(eq_predicate())),
            mock(int_rows(&[1, 2]), cols.clone()),
            mock(int_rows(&[2]), cols),
        );
        let rows = drain(exec);
        assert_eq!(
            rows,
            vec![
                vec![Value::Integer(1), Value::Null(TypeId::Integer)],
                vec![Value::Integer(2), Value::Integer(2)],
            ]
        );
    }

    #[test]
    fn hash_join_agrees_with_nlj_on_equi_join() {
        let cols = vec![Column::new("x", TypeId::Integer)];
        let node = HashJoinNode {
            schema: Schema::new(vec![
                Column::new("l", TypeId::Integer),
                Column::new("r", TypeId::Integer),
            ]),
            left: mock_plan(),
            right: mock_plan(),
            left_keys: vec![Expression::column(0, 0, Column::new("l", TypeId::Integer))],
            right_keys: vec![Expression::column(0, 0, Column::new("r", TypeId::Integer))],
            join_type: JoinType::Inner,
        };
        let exec = HashJoinExecutor::new(
            node,
            mock(int_rows(&[1, 2, 2, 5]), cols.clone()),
            mock(int_rows(&[2, 5, 7]), cols),
        );
        let rows = drain(exec);
        assert_eq!(rows.len(), 3);
        assert!(rows.contains(&vec![Value::Integer(5), Value::Integer(5)]));
    }

    #[test]
    fn null_keys_never_match() {
        let cols = vec![Column::new("x", TypeId::Integer)];
        let mut rows = int_rows(&[1]);
        rows.push(vec![Value::Null(TypeId::Integer)]);
        let node = HashJoinNode {
            schema: Schema::new(vec![
                Column::new("l", TypeId::Integer),
                Column::new("r", TypeId::Integer),
            ]),
            left: mock_plan(),
            right: mock_plan(),
            left_keys: vec![Expression::column(0, 0, Column::new("l", TypeId::Integer))],
            right_keys: vec![Expression::column(0, 0, Column::new("r", TypeId::Integer))],
            join_type: JoinType::Inner,
        };
        let exec = HashJoinExecutor::new(
            node,
            mock(rows.clone(), cols.clone()),
            mock(rows, cols),
        );
        assert_eq!(drain(exec).len(), 1, "NULL = NULL must not join");
    }
}
