//! # Rule-Based Optimizer
//!
//! A fixed sequence of pure tree→tree rewrites applied bottom-up, once, in
//! a deterministic order. No cost model: every rule either strictly
//! specializes a plan (fold a filter into a scan, swap a nested loop for a
//! hash join) or leaves it untouched. All rules are idempotent, so a second
//! driver pass would be a no-op.
//!
//! ## Rule Order
//!
//! 1. `merge_filter_nlj` — fold a filter over a join into the join predicate
//! 2. `nlj_as_index_join` — probe an inner-side index on the join key
//! 3. `nlj_as_hash_join` — equi-join conjunctions become hash joins
//! 4. `order_by_index` — an ORDER BY over an ordered index becomes an
//!    index-order scan
//! 5. `sort_limit_as_topn` — Sort+Limit collapses into TopN
//! 6. `vector_index_scan` — TopN by vector distance over an indexed column
//!    becomes a vector index probe
//! 7. `merge_filter_scan` — push residual filters into sequential scans
//! 8. `seq_scan_as_index_scan` — a single-equality scan predicate becomes an
//!    index point lookup
//! 9. `merge_projection` — drop identity projections

use crate::catalog::Catalog;
use crate::expression::{ComparisonOp, Expression, LogicOp};
use crate::index::IndexKind;
use crate::plan::{
    FilterNode, HashJoinNode, IndexScanNode, NestedIndexJoinNode, PlanNode, SeqScanNode, TopNNode,
    VectorIndexScanNode,
};
use crate::types::Value;
use std::sync::Arc;
use tracing::trace;

pub fn optimize(plan: Arc<PlanNode>, catalog: &Catalog) -> Arc<PlanNode> {
    let rules: [(&str, &RuleFn); 9] = [
        ("merge_filter_nlj", &merge_filter_nlj),
        ("nlj_as_index_join", &nlj_as_index_join),
        ("nlj_as_hash_join", &nlj_as_hash_join),
        ("order_by_index", &order_by_index),
        ("sort_limit_as_topn", &sort_limit_as_topn),
        ("vector_index_scan", &vector_index_scan),
        ("merge_filter_scan", &merge_filter_scan),
        ("seq_scan_as_index_scan", &seq_scan_as_index_scan),
        ("merge_projection", &merge_projection),
    ];
    let mut plan = plan;
    for (name, rule) in rules {
        let next = apply_bottom_up(plan.clone(), catalog, rule);
        if !Arc::ptr_eq(&next, &plan) {
            trace!(rule = name, "plan rewritten");
        }
        plan = next;
    }
    plan
}

type RuleFn = dyn Fn(Arc<PlanNode>, &Catalog) -> Arc<PlanNode>;

fn apply_bottom_up(plan: Arc<PlanNode>, catalog: &Catalog, rule: &RuleFn) -> Arc<PlanNode> {
    let children = plan.children();
    if children.is_empty() {
        return rule(plan, catalog);
    }
    let new_children: Vec<Arc<PlanNode>> = children
        .into_iter()
        .map(|c| apply_bottom_up(Arc::clone(c), catalog, rule))
        .collect();
    let rebuilt = if new_children
        .iter()
        .zip(plan.children())
        .all(|(new, old)| Arc::ptr_eq(new, old))
    {
        plan
    } else {
        Arc::new(replace_children(&plan, new_children))
    };
    rule(rebuilt, catalog)
}

fn replace_children(plan: &PlanNode, mut children: Vec<Arc<PlanNode>>) -> PlanNode {
    let mut node = plan.clone();
    match &mut node {
        PlanNode::Insert(n) => n.child = children.remove(0),
        PlanNode::Update(n) => n.child = children.remove(0),
        PlanNode::Delete(n) => n.child = children.remove(0),
        PlanNode::Filter(n) => n.child = children.remove(0),
        PlanNode::Projection(n) => n.child = children.remove(0),
        PlanNode::Aggregation(n) => n.child = children.remove(0),
        PlanNode::Sort(n) => n.child = children.remove(0),
        PlanNode::Limit(n) => n.child = children.remove(0),
        PlanNode::TopN(n) => n.child = children.remove(0),
        PlanNode::TopNPerGroup(n) => n.child = children.remove(0),
        PlanNode::Window(n) => n.child = children.remove(0),
        PlanNode::NestedIndexJoin(n) => n.left = children.remove(0),
        PlanNode::NestedLoopJoin(n) => {
            n.left = children.remove(0);
            n.right = children.remove(0);
        }
        PlanNode::HashJoin(n) => {
            n.left = children.remove(0);
            n.right = children.remove(0);
        }
        PlanNode::SeqScan(_)
        | PlanNode::IndexScan(_)
        | PlanNode::VectorIndexScan(_)
        | PlanNode::MockScan(_)
        | PlanNode::Values(_) => {}
    }
    node
}

// ----------------------------------------------------------------------
// Expression plumbing
// ----------------------------------------------------------------------

fn split_conjunction(expr: &Expression, out: &mut Vec<Expression>) {
    match expr {
        Expression::Logic { op: LogicOp::And, lhs, rhs } => {
            split_conjunction(lhs, out);
            split_conjunction(rhs, out);
        }
        other => out.push(other.clone()),
    }
}

fn and_all(mut exprs: Vec<Expression>) -> Expression {
    let mut acc = exprs.remove(0);
    for e in exprs {
        acc = Expression::logic(LogicOp::And, acc, e);
    }
    acc
}

/// Rewrites single-input column references (over a join's output schema)
/// into two-sided references, splitting at `left_len`. Fails when the
/// expression already uses two-sided references.
fn to_join_sides(expr: &Expression, left_len: usize) -> Option<Expression> {
    Some(match expr {
        Expression::ColumnValue { tuple_idx, col_idx, col } => {
            if *tuple_idx != 0 {
                return None;
            }
            if *col_idx < left_len {
                Expression::column(0, *col_idx, col.clone())
            } else {
                Expression::column(1, *col_idx - left_len, col.clone())
            }
        }
        Expression::Constant { value } => Expression::constant(value.clone()),
        Expression::Comparison { op, lhs, rhs } => Expression::Comparison {
            op: *op,
            lhs: Box::new(to_join_sides(lhs, left_len)?),
            rhs: Box::new(to_join_sides(rhs, left_len)?),
        },
        Expression::Arithmetic { op, lhs, rhs } => Expression::Arithmetic {
            op: *op,
            lhs: Box::new(to_join_sides(lhs, left_len)?),
            rhs: Box::new(to_join_sides(rhs, left_len)?),
        },
        Expression::Logic { op, lhs, rhs } => Expression::Logic {
            op: *op,
            lhs: Box::new(to_join_sides(lhs, left_len)?),
            rhs: Box::new(to_join_sides(rhs, left_len)?),
        },
        Expression::VectorDistance { kind, lhs, rhs } => Expression::VectorDistance {
            kind: *kind,
            lhs: Box::new(to_join_sides(lhs, left_len)?),
            rhs: Box::new(to_join_sides(rhs, left_len)?),
        },
        Expression::StringCall { function, input } => Expression::StringCall {
            function: *function,
            input: Box::new(to_join_sides(input, left_len)?),
        },
    })
}

/// The side (0/1) and column of a bare column reference.
fn as_side_column(expr: &Expression) -> Option<(usize, usize)> {
    match expr {
        Expression::ColumnValue { tuple_idx, col_idx, .. } => Some((*tuple_idx, *col_idx)),
        _ => None,
    }
}

/// Rebinds a side-tagged column reference to a single-input reference.
fn rebind_single(expr: &Expression) -> Expression {
    match expr {
        Expression::ColumnValue { col_idx, col, .. } => Expression::column(0, *col_idx, col.clone()),
        other => other.clone(),
    }
}

// ----------------------------------------------------------------------
// Rules
// ----------------------------------------------------------------------

/// Filter directly above an inner nested-loop join folds into the join
/// predicate. Outer joins are excluded: their ON clause gates matching, not
/// the post-padding rows a WHERE must see.
fn merge_filter_nlj(plan: Arc<PlanNode>, _catalog: &Catalog) -> Arc<PlanNode> {
    let PlanNode::Filter(filter) = plan.as_ref() else { return plan };
    let PlanNode::NestedLoopJoin(join) = filter.child.as_ref() else {
        return plan;
    };
    if join.join_type != crate::plan::JoinType::Inner {
        return plan;
    }
    let left_len = join.left.output_schema().len();
    let Some(converted) = to_join_sides(&filter.predicate, left_len) else {
        return plan;
    };
    let predicate = match &join.predicate {
        Some(existing) => Expression::logic(LogicOp::And, existing.clone(), converted),
        None => converted,
    };
    let mut merged = join.clone();
    merged.predicate = Some(predicate);
    merged.schema = filter.schema.clone();
    Arc::new(PlanNode::NestedLoopJoin(merged))
}

/// An equi-join whose inner side is a bare scan of an indexed key becomes an
/// index nested-loop join.
fn nlj_as_index_join(plan: Arc<PlanNode>, catalog: &Catalog) -> Arc<PlanNode> {
    let PlanNode::NestedLoopJoin(join) = plan.as_ref() else { return plan };
    let Some(predicate) = &join.predicate else { return plan };
    let PlanNode::SeqScan(inner) = join.right.as_ref() else { return plan };
    if inner.predicate.is_some() {
        return plan;
    }
    let Expression::Comparison { op: ComparisonOp::Eq, lhs, rhs } = predicate else {
        return plan;
    };
    let (Some(a), Some(b)) = (as_side_column(lhs), as_side_column(rhs)) else {
        return plan;
    };
    let (outer_expr, inner_col) = match (a.0, b.0) {
        (0, 1) => (lhs.as_ref(), b.1),
        (1, 0) => (rhs.as_ref(), a.1),
        _ => return plan,
    };
    let index = catalog
        .table_indexes(&inner.table_name)
        .into_iter()
        .find(|i| i.key_index().is_some() && i.key_attrs == vec![inner_col]);
    let Some(index) = index else { return plan };

    Arc::new(PlanNode::NestedIndexJoin(NestedIndexJoinNode {
        schema: join.schema.clone(),
        left: Arc::clone(&join.left),
        inner_table_oid: inner.table_oid,
        inner_table_name: inner.table_name.clone(),
        index_name: index.name.clone(),
        key_expression: rebind_single(outer_expr),
        join_type: join.join_type,
    }))
}

/// A conjunction of cross-side equalities becomes a hash join.
fn nlj_as_hash_join(plan: Arc<PlanNode>, _catalog: &Catalog) -> Arc<PlanNode> {
    let PlanNode::NestedLoopJoin(join) = plan.as_ref() else { return plan };
    let Some(predicate) = &join.predicate else { return plan };

    let mut conjuncts = Vec::new();
    split_conjunction(predicate, &mut conjuncts);
    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    for leaf in &conjuncts {
        let Expression::Comparison { op: ComparisonOp::Eq, lhs, rhs } = leaf else {
            return plan;
        };
        let (Some(a), Some(b)) = (as_side_column(lhs), as_side_column(rhs)) else {
            return plan;
        };
        match (a.0, b.0) {
            (0, 1) => {
                left_keys.push(rebind_single(lhs));
                right_keys.push(rebind_single(rhs));
            }
            (1, 0) => {
                left_keys.push(rebind_single(rhs));
                right_keys.push(rebind_single(lhs));
            }
            _ => return plan,
        }
    }

    Arc::new(PlanNode::HashJoin(HashJoinNode {
        schema: join.schema.clone(),
        left: Arc::clone(&join.left),
        right: Arc::clone(&join.right),
        left_keys,
        right_keys,
        join_type: join.join_type,
    }))
}

/// ORDER BY a single ascending indexed column over a bare scan becomes an
/// index-order full scan.
fn order_by_index(plan: Arc<PlanNode>, catalog: &Catalog) -> Arc<PlanNode> {
    let PlanNode::Sort(sort) = plan.as_ref() else { return plan };
    let PlanNode::SeqScan(scan) = sort.child.as_ref() else { return plan };
    if scan.predicate.is_some() || sort.order_bys.len() != 1 {
        return plan;
    }
    let (crate::plan::OrderByType::Asc, expr) = &sort.order_bys[0] else {
        return plan;
    };
    let Some((0, col)) = as_side_column(expr) else { return plan };
    let index = catalog
        .table_indexes(&scan.table_name)
        .into_iter()
        .find(|i| {
            matches!(i.kind, IndexKind::BTree | IndexKind::Ordered) && i.key_attrs == vec![col]
        });
    let Some(index) = index else { return plan };

    Arc::new(PlanNode::IndexScan(IndexScanNode {
        schema: sort.schema.clone(),
        table_oid: scan.table_oid,
        table_name: scan.table_name.clone(),
        index_name: index.name.clone(),
        key: None,
        predicate: None,
    }))
}

/// Sort + Limit collapses into the bounded-heap TopN.
fn sort_limit_as_topn(plan: Arc<PlanNode>, _catalog: &Catalog) -> Arc<PlanNode> {
    let PlanNode::Limit(limit) = plan.as_ref() else { return plan };
    let PlanNode::Sort(sort) = limit.child.as_ref() else { return plan };
    Arc::new(PlanNode::TopN(TopNNode {
        schema: limit.schema.clone(),
        child: Arc::clone(&sort.child),
        order_bys: sort.order_bys.clone(),
        n: limit.limit,
    }))
}

/// TopN ordered by the distance between an indexed vector column and a
/// constant becomes a vector index probe.
fn vector_index_scan(plan: Arc<PlanNode>, catalog: &Catalog) -> Arc<PlanNode> {
    let PlanNode::TopN(topn) = plan.as_ref() else { return plan };
    let PlanNode::SeqScan(scan) = topn.child.as_ref() else { return plan };
    if scan.predicate.is_some() || topn.order_bys.len() != 1 {
        return plan;
    }
    let (crate::plan::OrderByType::Asc, expr) = &topn.order_bys[0] else {
        return plan;
    };
    let Expression::VectorDistance { kind, lhs, rhs } = expr else { return plan };
    let (column, query) = match (lhs.as_ref(), rhs.as_ref()) {
        (Expression::ColumnValue { tuple_idx: 0, col_idx, .. },
         Expression::Constant { value: Value::Vector(q) }) => (*col_idx, q.clone()),
        (Expression::Constant { value: Value::Vector(q) },
         Expression::ColumnValue { tuple_idx: 0, col_idx, .. }) => (*col_idx, q.clone()),
        _ => return plan,
    };
    let index = catalog
        .table_indexes(&scan.table_name)
        .into_iter()
        .find(|i| i.distance_kind() == Some(*kind) && i.key_attrs == vec![column]);
    let Some(index) = index else { return plan };

    Arc::new(PlanNode::VectorIndexScan(VectorIndexScanNode {
        schema: topn.schema.clone(),
        table_oid: scan.table_oid,
        table_name: scan.table_name.clone(),
        index_name: index.name.clone(),
        query,
        k: topn.n,
    }))
}

/// Filter over a sequential scan folds into the scan as a pushed-down
/// predicate.
fn merge_filter_scan(plan: Arc<PlanNode>, _catalog: &Catalog) -> Arc<PlanNode> {
    let PlanNode::Filter(filter) = plan.as_ref() else { return plan };
    let PlanNode::SeqScan(scan) = filter.child.as_ref() else { return plan };
    let predicate = match &scan.predicate {
        Some(existing) => and_all(vec![existing.clone(), filter.predicate.clone()]),
        None => filter.predicate.clone(),
    };
    Arc::new(PlanNode::SeqScan(SeqScanNode {
        schema: filter.schema.clone(),
        table_oid: scan.table_oid,
        table_name: scan.table_name.clone(),
        predicate: Some(predicate),
    }))
}

/// A scan whose predicate is one equality on an indexed column becomes an
/// index point lookup.
fn seq_scan_as_index_scan(plan: Arc<PlanNode>, catalog: &Catalog) -> Arc<PlanNode> {
    let PlanNode::SeqScan(scan) = plan.as_ref() else { return plan };
    let Some(Expression::Comparison { op: ComparisonOp::Eq, lhs, rhs }) = &scan.predicate else {
        return plan;
    };
    let (column, constant) = match (lhs.as_ref(), rhs.as_ref()) {
        (Expression::ColumnValue { tuple_idx: 0, col_idx, .. }, Expression::Constant { value }) => {
            (*col_idx, value.clone())
        }
        (Expression::Constant { value }, Expression::ColumnValue { tuple_idx: 0, col_idx, .. }) => {
            (*col_idx, value.clone())
        }
        _ => return plan,
    };
    if constant.is_null() {
        return plan;
    }
    let index = catalog
        .table_indexes(&scan.table_name)
        .into_iter()
        .find(|i| i.key_index().is_some() && i.key_attrs == vec![column]);
    let Some(index) = index else { return plan };
    let Ok(key) = constant.cast_to(index.key_schema.column(0).type_id()) else {
        return plan;
    };

    Arc::new(PlanNode::IndexScan(IndexScanNode {
        schema: scan.schema.clone(),
        table_oid: scan.table_oid,
        table_name: scan.table_name.clone(),
        index_name: index.name.clone(),
        key: Some(vec![key]),
        predicate: scan.predicate.clone(),
    }))
}

/// An identity projection (exactly `column_0, column_1, …` with matching
/// types) disappears.
fn merge_projection(plan: Arc<PlanNode>, _catalog: &Catalog) -> Arc<PlanNode> {
    let PlanNode::Projection(projection) = plan.as_ref() else { return plan };
    let child_schema = projection.child.output_schema();
    if projection.expressions.len() != child_schema.len() {
        return plan;
    }
    let identity = projection.expressions.iter().enumerate().all(|(i, e)| {
        matches!(e, Expression::ColumnValue { tuple_idx: 0, col_idx, col }
            if *col_idx == i && col.type_id() == child_schema.column(i).type_id())
    });
    if !identity || !projection.schema.projection_compatible(child_schema) {
        return plan;
    }
    Arc::clone(&projection.child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IndexSpec;
    use crate::config::SessionConfig;
    use crate::expression::Expression;
    use crate::index::{DistanceKind, HnswOptions};
    use crate::plan::{LimitNode, OrderByType, ProjectionNode, SortNode};
    use crate::storage::{BufferPoolManager, DiskManager};
    use crate::types::{Column, Schema, TypeId};

    fn catalog() -> Catalog {
        let bpm = BufferPoolManager::new(16, DiskManager::in_memory());
        let catalog = Catalog::new(bpm, Arc::new(SessionConfig::new()));
        let schema = Schema::new(vec![
            Column::new("a", TypeId::Integer),
            Column::new_vector("v", 4),
        ]);
        catalog.create_table("t", schema).unwrap();
        catalog.create_index("t_a", "t", vec![0], IndexSpec::BTree).unwrap();
        catalog
            .create_index(
                "t_v",
                "t",
                vec![1],
                IndexSpec::Hnsw { distance: DistanceKind::L2, options: HnswOptions::default() },
            )
            .unwrap();
        catalog
    }

    fn scan(catalog: &Catalog) -> Arc<PlanNode> {
        let table = catalog.table("t").unwrap();
        Arc::new(PlanNode::SeqScan(SeqScanNode {
            schema: table.schema.clone(),
            table_oid: table.oid,
            table_name: "t".into(),
            predicate: None,
        }))
    }

    fn col_a() -> Expression {
        Expression::column(0, 0, Column::new("a", TypeId::Integer))
    }

    #[test]
    fn filter_folds_into_scan_then_index_scan() {
        let catalog = catalog();
        let scan = scan(&catalog);
        let filter = Arc::new(PlanNode::Filter(FilterNode {
            schema: scan.output_schema().clone(),
            predicate: Expression::comparison(
                ComparisonOp::Eq,
                col_a(),
                Expression::constant(Value::Integer(7)),
            ),
            child: scan,
        }));
        let optimized = optimize(filter, &catalog);
        match optimized.as_ref() {
            PlanNode::IndexScan(node) => {
                assert_eq!(node.index_name, "t_a");
                assert_eq!(node.key, Some(vec![Value::Integer(7)]));
            }
            other => panic!("expected IndexScan, got {}", other.name()),
        }
    }

    #[test]
    fn sort_limit_becomes_topn() {
        let catalog = catalog();
        let scan = scan(&catalog);
        // Sort on a non-indexed expression so order_by_index stays out.
        let dist = Expression::Arithmetic {
            op: crate::expression::ArithmeticOp::Add,
            lhs: Box::new(col_a()),
            rhs: Box::new(Expression::constant(Value::Integer(1))),
        };
        let sort = Arc::new(PlanNode::Sort(SortNode {
            schema: scan.output_schema().clone(),
            order_bys: vec![(OrderByType::Asc, dist)],
            child: scan,
        }));
        let limit = Arc::new(PlanNode::Limit(LimitNode {
            schema: sort.output_schema().clone(),
            child: sort,
            limit: 5,
        }));
        let optimized = optimize(limit, &catalog);
        assert!(matches!(optimized.as_ref(), PlanNode::TopN(n) if n.n == 5));
    }

    #[test]
    fn vector_topn_becomes_vector_index_scan() {
        let catalog = catalog();
        let scan = scan(&catalog);
        let dist = Expression::VectorDistance {
            kind: DistanceKind::L2,
            lhs: Box::new(Expression::column(0, 1, Column::new_vector("v", 4))),
            rhs: Box::new(Expression::constant(Value::Vector(vec![0.0; 4]))),
        };
        let sort = Arc::new(PlanNode::Sort(SortNode {
            schema: scan.output_schema().clone(),
            order_bys: vec![(OrderByType::Asc, dist)],
            child: scan,
        }));
        let limit = Arc::new(PlanNode::Limit(LimitNode {
            schema: sort.output_schema().clone(),
            child: sort,
            limit: 10,
        }));
        let optimized = optimize(limit, &catalog);
        match optimized.as_ref() {
            PlanNode::VectorIndexScan(node) => {
                assert_eq!(node.index_name, "t_v");
                assert_eq!(node.k, 10);
                assert_eq!(node.query.len(), 4);
            }
            other => panic!("expected VectorIndexScan, got {}", other.name()),
        }
    }

    #[test]
    fn identity_projection_is_dropped() {
        let catalog = catalog();
        let scan = scan(&catalog);
        let exprs: Vec<Expression> = scan
            .output_schema()
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| Expression::column(0, i, c.clone()))
            .collect();
        let projection = Arc::new(PlanNode::Projection(ProjectionNode {
            schema: scan.output_schema().clone(),
            expressions: exprs,
            child: Arc::clone(&scan),
        }));
        let optimized = optimize(projection, &catalog);
        assert!(Arc::ptr_eq(&optimized, &scan));
    }

    #[test]
    fn order_by_indexed_column_uses_index_order() {
        let catalog = catalog();
        let scan = scan(&catalog);
        let sort = Arc::new(PlanNode::Sort(SortNode {
            schema: scan.output_schema().clone(),
            order_bys: vec![(OrderByType::Asc, col_a())],
            child: scan,
        }));
        let optimized = optimize(sort, &catalog);
        match optimized.as_ref() {
            PlanNode::IndexScan(node) => {
                assert_eq!(node.index_name, "t_a");
                assert!(node.key.is_none());
            }
            other => panic!("expected IndexScan, got {}", other.name()),
        }
    }

    #[test]
    fn rules_are_idempotent() {
        let catalog = catalog();
        let scan = scan(&catalog);
        let filter = Arc::new(PlanNode::Filter(FilterNode {
            schema: scan.output_schema().clone(),
            predicate: Expression::comparison(
                ComparisonOp::Gt,
                col_a(),
                Expression::constant(Value::Integer(0)),
            ),
            child: scan,
        }));
        let once = optimize(filter, &catalog);
        let twice = optimize(once.clone(), &catalog);
        assert_eq!(once.to_string(), twice.to_string());
    }
}
