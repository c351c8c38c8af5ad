//! # Query Plans
//!
//! Immutable plan trees produced by the planner, rewritten by the optimizer
//! and consumed by the executor factory. Nodes are shared as `Arc<PlanNode>`;
//! a rewrite allocates new nodes along the changed spine and reuses every
//! untouched subtree.
//!
//! Every node owns its `output_schema`; executors never re-derive column
//! layouts. `EXPLAIN` output is the `Display` impl: one node per line,
//! children indented below their parent.

use crate::catalog::TableOid;
use crate::expression::Expression;
use crate::types::{Schema, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    pub fn name(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderByType {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

impl AggregationType {
    pub fn name(self) -> &'static str {
        match self {
            AggregationType::CountStar => "count(*)",
            AggregationType::Count => "count",
            AggregationType::Sum => "sum",
            AggregationType::Min => "min",
            AggregationType::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    RowNumber,
    Rank,
}

pub type OrderBy = (OrderByType, Expression);

#[derive(Debug, Clone)]
pub struct SeqScanNode {
    pub schema: Schema,
    pub table_oid: TableOid,
    pub table_name: String,
    /// Pushed-down predicate evaluated before a tuple is yielded.
    pub predicate: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct IndexScanNode {
    pub schema: Schema,
    pub table_oid: TableOid,
    pub table_name: String,
    pub index_name: String,
    /// Point-lookup key values; `None` scans the whole index in key order.
    pub key: Option<Vec<Value>>,
    pub predicate: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct VectorIndexScanNode {
    pub schema: Schema,
    pub table_oid: TableOid,
    pub table_name: String,
    pub index_name: String,
    pub query: Vec<f64>,
    pub k: usize,
}

#[derive(Debug, Clone)]
pub struct MockScanNode {
    pub schema: Schema,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct ValuesNode {
    pub schema: Schema,
    pub rows: Vec<Vec<Expression>>,
}

#[derive(Debug, Clone)]
pub struct InsertNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub table_oid: TableOid,
    pub table_name: String,
}

#[derive(Debug, Clone)]
pub struct UpdateNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub table_oid: TableOid,
    pub table_name: String,
    /// One expression per table column computing its new value.
    pub target_expressions: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub struct DeleteNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub table_oid: TableOid,
    pub table_name: String,
}

#[derive(Debug, Clone)]
pub struct FilterNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub predicate: Expression,
}

#[derive(Debug, Clone)]
pub struct ProjectionNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub expressions: Vec<Expression>,
}

#[derive(Debug, Clone)]
pub struct NestedLoopJoinNode {
    pub schema: Schema,
    pub left: Arc<PlanNode>,
    pub right: Arc<PlanNode>,
    pub predicate: Option<Expression>,
    pub join_type: JoinType,
}

#[derive(Debug, Clone)]
pub struct NestedIndexJoinNode {
    pub schema: Schema,
    pub left: Arc<PlanNode>,
    pub inner_table_oid: TableOid,
    pub inner_table_name: String,
    pub index_name: String,
    /// Evaluated against the outer tuple to produce the probe key.
    pub key_expression: Expression,
    pub join_type: JoinType,
}

#[derive(Debug, Clone)]
pub struct HashJoinNode {
    pub schema: Schema,
    pub left: Arc<PlanNode>,
    pub right: Arc<PlanNode>,
    pub left_keys: Vec<Expression>,
    pub right_keys: Vec<Expression>,
    pub join_type: JoinType,
}

#[derive(Debug, Clone)]
pub struct AggregationNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub group_bys: Vec<Expression>,
    pub aggregates: Vec<Expression>,
    pub agg_types: Vec<AggregationType>,
}

#[derive(Debug, Clone)]
pub struct SortNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub order_bys: Vec<OrderBy>,
}

#[derive(Debug, Clone)]
pub struct LimitNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct TopNNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub order_bys: Vec<OrderBy>,
    pub n: usize,
}

#[derive(Debug, Clone)]
pub struct TopNPerGroupNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub group_bys: Vec<Expression>,
    pub order_bys: Vec<OrderBy>,
    pub n: usize,
}

#[derive(Debug, Clone)]
pub struct WindowNode {
    pub schema: Schema,
    pub child: Arc<PlanNode>,
    pub partition_by: Vec<Expression>,
    pub order_by: Vec<OrderBy>,
    pub function: WindowFunction,
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    SeqScan(SeqScanNode),
    IndexScan(IndexScanNode),
    VectorIndexScan(VectorIndexScanNode),
    MockScan(MockScanNode),
    Values(ValuesNode),
    Insert(InsertNode),
    Update(UpdateNode),
    Delete(DeleteNode),
    Filter(FilterNode),
    Projection(ProjectionNode),
    NestedLoopJoin(NestedLoopJoinNode),
    NestedIndexJoin(NestedIndexJoinNode),
    HashJoin(HashJoinNode),
    Aggregation(AggregationNode),
    Sort(SortNode),
    Limit(LimitNode),
    TopN(TopNNode),
    TopNPerGroup(TopNPerGroupNode),
    Window(WindowNode),
}

impl PlanNode {
    pub fn output_schema(&self) -> &Schema {
        match self {
            PlanNode::SeqScan(n) => &n.schema,
            PlanNode::IndexScan(n) => &n.schema,
            PlanNode::VectorIndexScan(n) => &n.schema,
            PlanNode::MockScan(n) => &n.schema,
            PlanNode::Values(n) => &n.schema,
            PlanNode::Insert(n) => &n.schema,
            PlanNode::Update(n) => &n.schema,
            PlanNode::Delete(n) => &n.schema,
            PlanNode::Filter(n) => &n.schema,
            PlanNode::Projection(n) => &n.schema,
            PlanNode::NestedLoopJoin(n) => &n.schema,
            PlanNode::NestedIndexJoin(n) => &n.schema,
            PlanNode::HashJoin(n) => &n.schema,
            PlanNode::Aggregation(n) => &n.schema,
            PlanNode::Sort(n) => &n.schema,
            PlanNode::Limit(n) => &n.schema,
            PlanNode::TopN(n) => &n.schema,
            PlanNode::TopNPerGroup(n) => &n.schema,
            PlanNode::Window(n) => &n.schema,
        }
    }

    pub fn children(&self) -> Vec<&Arc<PlanNode>> {
        match self {
            PlanNode::SeqScan(_)
            | PlanNode::IndexScan(_)
            | PlanNode::VectorIndexScan(_)
            | PlanNode::MockScan(_)
            | PlanNode::Values(_) => Vec::new(),
            PlanNode::Insert(n) => vec![&n.child],
            PlanNode::Update(n) => vec![&n.child],
            PlanNode::Delete(n) => vec![&n.child],
            PlanNode::Filter(n) => vec![&n.child],
            PlanNode::Projection(n) => vec![&n.child],
            PlanNode::NestedLoopJoin(n) => vec![&n.left, &n.right],
            PlanNode::NestedIndexJoin(n) => vec![&n.left],
            PlanNode::HashJoin(n) => vec![&n.left, &n.right],
            PlanNode::Aggregation(n) => vec![&n.child],
            PlanNode::Sort(n) => vec![&n.child],
            PlanNode::Limit(n) => vec![&n.child],
            PlanNode::TopN(n) => vec![&n.child],
            PlanNode::TopNPerGroup(n) => vec![&n.child],
            PlanNode::Window(n) => vec![&n.child],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlanNode::SeqScan(_) => "SeqScan",
            PlanNode::IndexScan(_) => "IndexScan",
            PlanNode::VectorIndexScan(_) => "VectorIndexScan",
            PlanNode::MockScan(_) => "MockScan",
            PlanNode::Values(_) => "Values",
            PlanNode::Insert(_) => "Insert",
            PlanNode::Update(_) => "Update",
            PlanNode::Delete(_) => "Delete",
            PlanNode::Filter(_) => "Filter",
            PlanNode::Projection(_) => "Projection",
            PlanNode::NestedLoopJoin(_) => "NestedLoopJoin",
            PlanNode::NestedIndexJoin(_) => "NestedIndexJoin",
            PlanNode::HashJoin(_) => "HashJoin",
            PlanNode::Aggregation(_) => "Aggregation",
            PlanNode::Sort(_) => "Sort",
            PlanNode::Limit(_) => "Limit",
            PlanNode::TopN(_) => "TopN",
            PlanNode::TopNPerGroup(_) => "TopNPerGroup",
            PlanNode::Window(_) => "Window",
        }
    }

    fn describe(&self) -> String {
        fn exprs(list: &[Expression]) -> String {
            list.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        }
        fn orders(list: &[OrderBy]) -> String {
            list.iter()
                .map(|(dir, e)| {
                    format!("{e} {}", if *dir == OrderByType::Desc { "DESC" } else { "ASC" })
                })
                .collect::<Vec<_>>()
                .join(", ")
        }
        match self {
            PlanNode::SeqScan(n) => match &n.predicate {
                Some(p) => format!("table={} predicate={p}", n.table_name),
                None => format!("table={}", n.table_name),
            },
            PlanNode::IndexScan(n) => {
                let key = match &n.key {
                    Some(values) => values
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                    None => "<full>".into(),
                };
                format!("index={} table={} key=({key})", n.index_name, n.table_name)
            }
            PlanNode::VectorIndexScan(n) => {
                format!("index={} table={} k={}", n.index_name, n.table_name, n.k)
            }
            PlanNode::MockScan(n) => format!("rows={}", n.rows.len()),
            PlanNode::Values(n) => format!("rows={}", n.rows.len()),
            PlanNode::Insert(n) => format!("table={}", n.table_name),
            PlanNode::Update(n) => {
                format!("table={} targets=[{}]", n.table_name, exprs(&n.target_expressions))
            }
            PlanNode::Delete(n) => format!("table={}", n.table_name),
            PlanNode::Filter(n) => format!("predicate={}", n.predicate),
            PlanNode::Projection(n) => format!("exprs=[{}]", exprs(&n.expressions)),
            PlanNode::NestedLoopJoin(n) => match &n.predicate {
                Some(p) => format!("type={} predicate={p}", n.join_type.name()),
                None => format!("type={}", n.join_type.name()),
            },
            PlanNode::NestedIndexJoin(n) => format!(
                "type={} index={} table={} key={}",
                n.join_type.name(),
                n.index_name,
                n.inner_table_name,
                n.key_expression
            ),
            PlanNode::HashJoin(n) => format!(
                "type={} left_keys=[{}] right_keys=[{}]",
                n.join_type.name(),
                exprs(&n.left_keys),
                exprs(&n.right_keys)
            ),
            PlanNode::Aggregation(n) => {
                let aggs = n
                    .agg_types
                    .iter()
                    .zip(n.aggregates.iter())
                    .map(|(ty, e)| format!("{}({e})", ty.name()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("group_by=[{}] aggs=[{aggs}]", exprs(&n.group_bys))
            }
            PlanNode::Sort(n) => format!("order_by=[{}]", orders(&n.order_bys)),
            PlanNode::Limit(n) => format!("limit={}", n.limit),
            PlanNode::TopN(n) => format!("n={} order_by=[{}]", n.n, orders(&n.order_bys)),
            PlanNode::TopNPerGroup(n) => format!(
                "n={} group_by=[{}] order_by=[{}]",
                n.n,
                exprs(&n.group_bys),
                orders(&n.order_bys)
            ),
            PlanNode::Window(n) => format!(
                "function={:?} partition_by=[{}] order_by=[{}]",
                n.function,
                exprs(&n.partition_by),
                orders(&n.order_by)
            ),
        }
    }

    fn fmt_tree(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
        writeln!(
            f,
            "{}-> {} {{ {} }} {}",
            "  ".repeat(depth),
            self.name(),
            self.describe(),
            self.output_schema()
        )?;
        for child in self.children() {
            child.fmt_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for PlanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_tree(f, 0)
    }
}
