//! Ordering operators: sort, limit, top-n and top-n-per-group.
//!
//! All of them order rows by a memcomparable sort key: each ORDER BY cell is
//! encoded with the index key codec, and descending segments are
//! byte-complemented (cell encodings are never proper prefixes of one
//! another, so complementing a segment exactly reverses its order). Rows
//! then compare with plain byte comparison — one comparator serves sort
//! buffers, bounded heaps and window partitions alike.

use super::Executor;
use crate::index::encoding::encode_value;
use crate::plan::{LimitNode, OrderBy, SortNode, TopNNode, TopNPerGroupNode};
use crate::storage::{Rid, Tuple};
use crate::types::Schema;
use crate::index::encode_key;
use crate::plan::OrderByType;
use eyre::Result;
use hashbrown::HashMap;
use std::collections::BinaryHeap;

/// The memcomparable sort key of one row under an ORDER BY list.
pub fn order_key(order_bys: &[OrderBy], tuple: &Tuple, schema: &Schema) -> Result<Vec<u8>> {
    let mut key = Vec::new();
    for (direction, expr) in order_bys {
        let value = expr.evaluate(tuple, schema)?;
        let start = key.len();
        encode_value(&value, &mut key);
        if *direction == OrderByType::Desc {
            for b in &mut key[start..] {
                *b = !*b;
            }
        }
    }
    Ok(key)
}

pub struct SortExecutor {
    node: SortNode,
    child: Box<dyn Executor>,
    sorted: Vec<(Tuple, Rid)>,
    pos: usize,
}

impl SortExecutor {
    pub fn new(node: SortNode, child: Box<dyn Executor>) -> Self {
        Self { node, child, sorted: Vec::new(), pos: 0 }
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.sorted.clear();
        self.pos = 0;

        let schema = self.child.schema().clone();
        let mut keyed: Vec<(Vec<u8>, Tuple, Rid)> = Vec::new();
        while let Some((tuple, rid)) = self.child.next()? {
            keyed.push((order_key(&self.node.order_bys, &tuple, &schema)?, tuple, rid));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        self.sorted = keyed.into_iter().map(|(_, tuple, rid)| (tuple, rid)).collect();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some((tuple, rid)) = self.sorted.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some((tuple.clone(), *rid)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

pub struct LimitExecutor {
    node: LimitNode,
    child: Box<dyn Executor>,
    emitted: usize,
}

impl LimitExecutor {
    pub fn new(node: LimitNode, child: Box<dyn Executor>) -> Self {
        Self { node, child, emitted: 0 }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> Result<()> {
        self.emitted = 0;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        if self.emitted >= self.node.limit {
            return Ok(None);
        }
        match self.child.next()? {
            Some(pair) => {
                self.emitted += 1;
                Ok(Some(pair))
            }
            None => Ok(None),
        }
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

/// Bounded selection: a max-heap of the n best rows seen so far, keyed by
/// the memcomparable sort key; the worst resident row bounds admission and
/// is dropped on overflow, so memory stays O(n).
struct TopEntry {
    key: Vec<u8>,
    /// Arrival order; ties stay stable.
    seq: usize,
    tuple: Tuple,
    rid: Rid,
}

impl PartialEq for TopEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}

impl Eq for TopEntry {}

impl PartialOrd for TopEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.key, self.seq).cmp(&(&other.key, other.seq))
    }
}

struct BoundedTopN {
    n: usize,
    seq: usize,
    heap: BinaryHeap<TopEntry>,
}

impl BoundedTopN {
    fn new(n: usize) -> Self {
        Self { n, seq: 0, heap: BinaryHeap::with_capacity(n + 1) }
    }

    fn offer(&mut self, key: Vec<u8>, tuple: Tuple, rid: Rid) {
        if self.n == 0 {
            return;
        }
        let seq = self.seq;
        self.seq += 1;
        if self.heap.len() == self.n {
            if let Some(worst) = self.heap.peek() {
                if key >= worst.key {
                    return;
                }
            }
        }
        self.heap.push(TopEntry { key, seq, tuple, rid });
        if self.heap.len() > self.n {
            self.heap.pop();
        }
    }

    fn into_sorted(self) -> Vec<(Tuple, Rid)> {
        let mut kept = self.heap.into_vec();
        kept.sort_by(|a, b| a.cmp(b));
        kept.into_iter().map(|e| (e.tuple, e.rid)).collect()
    }
}

pub struct TopNExecutor {
    node: TopNNode,
    child: Box<dyn Executor>,
    sorted: Vec<(Tuple, Rid)>,
    pos: usize,
}

impl TopNExecutor {
    pub fn new(node: TopNNode, child: Box<dyn Executor>) -> Self {
        Self { node, child, sorted: Vec::new(), pos: 0 }
    }
}

impl Executor for TopNExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.pos = 0;

        let schema = self.child.schema().clone();
        let mut top = BoundedTopN::new(self.node.n);
        while let Some((tuple, rid)) = self.child.next()? {
            let key = order_key(&self.node.order_bys, &tuple, &schema)?;
            top.offer(key, tuple, rid);
        }
        self.sorted = top.into_sorted();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some((tuple, rid)) = self.sorted.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some((tuple.clone(), *rid)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

pub struct TopNPerGroupExecutor {
    node: TopNPerGroupNode,
    child: Box<dyn Executor>,
    sorted: Vec<(Tuple, Rid)>,
    pos: usize,
}

impl TopNPerGroupExecutor {
    pub fn new(node: TopNPerGroupNode, child: Box<dyn Executor>) -> Self {
        Self { node, child, sorted: Vec::new(), pos: 0 }
    }
}

impl Executor for TopNPerGroupExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.pos = 0;

        let schema = self.child.schema().clone();
        let mut groups: HashMap<Vec<u8>, BoundedTopN> = HashMap::new();
        let mut group_order: Vec<Vec<u8>> = Vec::new();
        while let Some((tuple, rid)) = self.child.next()? {
            let group: Vec<crate::types::Value> = self
                .node
                .group_bys
                .iter()
                .map(|e| e.evaluate(&tuple, &schema))
                .collect::<Result<_>>()?;
            let group_key = encode_key(&group);
            let key = order_key(&self.node.order_bys, &tuple, &schema)?;
            if !groups.contains_key(&group_key) {
                groups.insert(group_key.clone(), BoundedTopN::new(self.node.n));
                group_order.push(group_key.clone());
            }
            groups.get_mut(&group_key).unwrap().offer(key, tuple, rid);
        }

        self.sorted.clear();
        for group_key in group_order {
            let top = groups.remove(&group_key).expect("group recorded in order");
            self.sorted.extend(top.into_sorted());
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some((tuple, rid)) = self.sorted.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some((tuple.clone(), *rid)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::scan::MockScanExecutor;
    use crate::expression::Expression;
    use crate::plan::{MockScanNode, PlanNode};
    use crate::types::{Column, TypeId, Value};
    use std::sync::Arc;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("g", TypeId::Integer),
            Column::new("x", TypeId::Integer),
        ])
    }

    fn mock(rows: Vec<Vec<Value>>) -> Box<dyn Executor> {
        Box::new(MockScanExecutor::new(MockScanNode { schema: schema(), rows }))
    }

    fn mock_plan() -> Arc<PlanNode> {
        Arc::new(PlanNode::MockScan(MockScanNode { schema: schema(), rows: Vec::new() }))
    }

    fn col(idx: usize, name: &str) -> Expression {
        Expression::column(0, idx, Column::new(name, TypeId::Integer))
    }

    fn rows() -> Vec<Vec<Value>> {
        [5, 1, 4, 1, 3]
            .iter()
            .enumerate()
            .map(|(i, &x)| vec![Value::Integer((i % 2) as i32), Value::Integer(x)])
            .collect()
    }

    fn x_values(mut exec: impl Executor) -> Vec<i32> {
        exec.init().unwrap();
        let mut out = Vec::new();
        while let Some((tuple, _)) = exec.next().unwrap() {
            match tuple.values(&schema()).unwrap()[1] {
                Value::Integer(x) => out.push(x),
                _ => unreachable!(),
            }
        }
        out
    }

    #[test]
    fn sort_ascending_and_descending() {
        let node = SortNode {
            schema: schema(),
            child: mock_plan(),
            order_bys: vec![(OrderByType::Asc, col(1, "x"))],
        };
        assert_eq!(x_values(SortExecutor::new(node, mock(rows()))), vec![1, 1, 3, 4, 5]);

        let node = SortNode {
            schema: schema(),
            child: mock_plan(),
            order_bys: vec![(OrderByType::Desc, col(1, "x"))],
        };
        assert_eq!(x_values(SortExecutor::new(node, mock(rows()))), vec![5, 4, 3, 1, 1]);
    }

    #[test]
    fn limit_truncates() {
        let node = LimitNode { schema: schema(), child: mock_plan(), limit: 2 };
        assert_eq!(x_values(LimitExecutor::new(node, mock(rows()))), vec![5, 1]);
    }

    #[test]
    fn topn_matches_sort_plus_limit() {
        let node = TopNNode {
            schema: schema(),
            child: mock_plan(),
            order_bys: vec![(OrderByType::Asc, col(1, "x"))],
            n: 3,
        };
        assert_eq!(x_values(TopNExecutor::new(node, mock(rows()))), vec![1, 1, 3]);
    }

    #[test]
    fn topn_per_group_keeps_n_rows_per_group() {
        let node = TopNPerGroupNode {
            schema: schema(),
            child: mock_plan(),
            group_bys: vec![col(0, "g")],
            order_bys: vec![(OrderByType::Desc, col(1, "x"))],
            n: 1,
        };
        let out = x_values(TopNPerGroupExecutor::new(node, mock(rows())));
        // Group 0 holds {5, 4, 3}, group 1 holds {1, 1}.
        assert_eq!(out, vec![5, 1]);
    }
}
