//! # Binder / Planner
//!
//! Turns a parsed statement into either a bound plan tree or a DDL/session
//! command. Binding resolves names against the catalog (under its read
//! lock), types every expression, and lowers the SELECT clauses onto plan
//! nodes bottom-up:
//!
//! ```text
//! SeqScan -> [Filter] -> [Aggregation] -> [Having-Filter]
//!         -> [Sort] -> [Limit] -> Projection
//! ```
//!
//! ORDER BY and LIMIT sit below the projection, so they bind against the
//! FROM scope (ordering by a projection alias is unsupported). Aggregate
//! calls are collected from the projection and HAVING clauses; expressions
//! above the aggregation rebind to its output columns, and any bare column
//! there must be one of the GROUP BY expressions.

use super::ast::{
    AstJoinType, BinaryOp, ColumnDef, Expr, OrderDir, SelectItem, SelectStmt, Stmt, TableRef,
};
use crate::catalog::{Catalog, IndexSpec};
use crate::error::DbError;
use crate::execution::agg::aggregate_result_column;
use crate::expression::{ArithmeticOp, ComparisonOp, Expression, LogicOp, StringFunction};
use crate::index::{DistanceKind, HnswOptions, IvfFlatOptions};
use crate::plan::{
    AggregationNode, AggregationType, DeleteNode, FilterNode, InsertNode, JoinType, LimitNode,
    NestedLoopJoinNode, OrderByType, PlanNode, ProjectionNode, SeqScanNode, SortNode, UpdateNode,
    ValuesNode,
};
use crate::types::{Column, Schema, TypeId, Value};
use eyre::{ensure, Result};
use std::sync::Arc;

/// What one statement asks the database to do.
pub enum Command {
    Query(Arc<PlanNode>),
    Explain(Arc<PlanNode>),
    CreateTable { name: String, columns: Vec<Column>, primary_key: Option<usize> },
    CreateIndex { name: String, table: String, key_attrs: Vec<usize>, spec: IndexSpec },
    Begin { serializable: bool },
    Commit,
    Abort,
    Set { name: String, value: String },
    Show { name: String },
}

fn invalid(msg: impl Into<String>) -> eyre::Report {
    DbError::InvalidInput(msg.into()).into()
}

/// Output schema of the mutating executors: a single row count.
pub fn mutation_schema() -> Schema {
    Schema::new(vec![Column::new("rows", TypeId::Integer)])
}

pub fn bind_statement(stmt: &Stmt<'_>, catalog: &Catalog) -> Result<Command> {
    match stmt {
        Stmt::CreateTable { name, columns } => bind_create_table(name, columns),
        Stmt::CreateIndex { name, table, method, column, op_class, options } => {
            bind_create_index(catalog, name, table, method, column, *op_class, options)
        }
        Stmt::Select(select) => Ok(Command::Query(bind_select(catalog, select)?)),
        Stmt::Insert { table, rows } => Ok(Command::Query(bind_insert(catalog, table, rows)?)),
        Stmt::Update { table, assignments, filter } => {
            Ok(Command::Query(bind_update(catalog, table, assignments, *filter)?))
        }
        Stmt::Delete { table, filter } => {
            Ok(Command::Query(bind_delete(catalog, table, *filter)?))
        }
        Stmt::Explain(inner) => match bind_statement(inner, catalog)? {
            Command::Query(plan) => Ok(Command::Explain(plan)),
            _ => Err(invalid("EXPLAIN expects a SELECT/INSERT/UPDATE/DELETE statement")),
        },
        Stmt::Begin { serializable } => Ok(Command::Begin { serializable: *serializable }),
        Stmt::Commit => Ok(Command::Commit),
        Stmt::Abort => Ok(Command::Abort),
        Stmt::Set { name, value } => {
            Ok(Command::Set { name: name.to_string(), value: value.to_string() })
        }
        Stmt::Show { name } => Ok(Command::Show { name: name.to_string() }),
    }
}

// ----------------------------------------------------------------------
// DDL
// ----------------------------------------------------------------------

fn bind_create_table(name: &str, columns: &[ColumnDef<'_>]) -> Result<Command> {
    let mut out = Vec::with_capacity(columns.len());
    let mut primary_key = None;
    for (idx, def) in columns.iter().enumerate() {
        ensure!(
            !out.iter().any(|c: &Column| c.name() == def.name),
            DbError::InvalidInput(format!("duplicate column name: {}", def.name))
        );
        let column = match def.type_id {
            TypeId::Varchar => Column::new_varchar(def.name, def.length),
            TypeId::Vector => Column::new_vector(def.name, def.length),
            ty => Column::new(def.name, ty),
        };
        out.push(column);
        if def.primary_key {
            ensure!(
                primary_key.is_none(),
                DbError::InvalidInput("multiple PRIMARY KEY columns".into())
            );
            primary_key = Some(idx);
        }
    }
    Ok(Command::CreateTable { name: name.to_string(), columns: out, primary_key })
}

fn bind_create_index(
    catalog: &Catalog,
    name: &str,
    table: &str,
    method: &str,
    column: &str,
    op_class: Option<&str>,
    options: &[(&str, f64)],
) -> Result<Command> {
    let info = catalog
        .table(table)
        .ok_or_else(|| invalid(format!("no such table: {table}")))?;
    let col_idx = info
        .schema
        .index_of(column)
        .ok_or_else(|| invalid(format!("no such column: {table}.{column}")))?;

    let distance = match op_class {
        None | Some("vector_l2_ops") => DistanceKind::L2,
        Some("vector_ip_ops") => DistanceKind::InnerProduct,
        Some("vector_cosine_ops") => DistanceKind::Cosine,
        Some(other) => return Err(invalid(format!("unknown operator class: {other}"))),
    };
    let option = |key: &str| options.iter().find(|(k, _)| *k == key).map(|(_, v)| *v as usize);

    let spec = match method {
        "btree" => IndexSpec::BTree,
        "hash" => IndexSpec::Hash,
        "ordered" => IndexSpec::Ordered,
        "unordered" => IndexSpec::Unordered,
        "hnsw" => {
            let defaults = HnswOptions::default();
            IndexSpec::Hnsw {
                distance,
                options: HnswOptions {
                    m: option("m").unwrap_or(defaults.m),
                    ef_construction: option("ef_construction").unwrap_or(defaults.ef_construction),
                    ef_search: option("ef_search").unwrap_or(defaults.ef_search),
                },
            }
        }
        "ivfflat" => {
            let defaults = IvfFlatOptions::default();
            IndexSpec::IvfFlat {
                distance,
                options: IvfFlatOptions {
                    lists: option("lists").unwrap_or(defaults.lists),
                    probe_lists: option("probe_lists").unwrap_or(defaults.probe_lists),
                },
            }
        }
        other => return Err(invalid(format!("unknown index method: {other}"))),
    };
    Ok(Command::CreateIndex {
        name: name.to_string(),
        table: table.to_string(),
        key_attrs: vec![col_idx],
        spec,
    })
}

// ----------------------------------------------------------------------
// Scopes and expression binding
// ----------------------------------------------------------------------

struct ScopeColumn {
    qualifier: Option<String>,
    column: Column,
}

struct Scope {
    columns: Vec<ScopeColumn>,
}

impl Scope {
    fn resolve(&self, table: Option<&str>, name: &str) -> Result<usize> {
        let mut hit = None;
        for (idx, sc) in self.columns.iter().enumerate() {
            if sc.column.name() != name {
                continue;
            }
            if let Some(table) = table {
                if sc.qualifier.as_deref() != Some(table) {
                    continue;
                }
            }
            ensure!(
                hit.is_none(),
                DbError::InvalidInput(format!("ambiguous column reference: {name}"))
            );
            hit = Some(idx);
        }
        hit.ok_or_else(|| match table {
            Some(table) => invalid(format!("no such column: {table}.{name}")),
            None => invalid(format!("no such column: {name}")),
        })
    }
}

fn literal_value(expr: &Expr<'_>) -> Option<Value> {
    match expr {
        Expr::IntLit(v) => Some(Value::BigInt(*v)),
        Expr::FloatLit(v) => Some(Value::Decimal(*v)),
        Expr::StringLit(s) => Some(Value::Varchar((*s).to_string())),
        Expr::BoolLit(b) => Some(Value::Boolean(*b)),
        Expr::NullLit => Some(Value::Null(TypeId::Invalid)),
        Expr::VectorLit(v) => Some(Value::Vector(v.to_vec())),
        Expr::Neg(inner) => match literal_value(inner)? {
            Value::BigInt(v) => Some(Value::BigInt(-v)),
            Value::Decimal(v) => Some(Value::Decimal(-v)),
            _ => None,
        },
        _ => None,
    }
}

fn bind_expr(expr: &Expr<'_>, scope: &Scope) -> Result<Expression> {
    if let Some(value) = literal_value(expr) {
        return Ok(Expression::constant(value));
    }
    match expr {
        Expr::Column { table, name } => {
            let idx = scope.resolve(*table, name)?;
            Ok(Expression::column(0, idx, scope.columns[idx].column.clone()))
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = bind_expr(lhs, scope)?;
            let rhs = bind_expr(rhs, scope)?;
            Ok(apply_binary(*op, lhs, rhs))
        }
        Expr::Neg(inner) => {
            let inner = bind_expr(inner, scope)?;
            Ok(Expression::Arithmetic {
                op: ArithmeticOp::Sub,
                lhs: Box::new(Expression::constant(Value::BigInt(0))),
                rhs: Box::new(inner),
            })
        }
        Expr::FnCall { name, arg, .. } => match string_function(name) {
            Some(function) => {
                let Some(arg) = arg else {
                    return Err(invalid(format!("{}() takes one argument", function.name())));
                };
                let input = bind_expr(arg, scope)?;
                Ok(Expression::StringCall { function, input: Box::new(input) })
            }
            None => Err(invalid(format!(
                "aggregate {name}() is only allowed in the SELECT list or HAVING"
            ))),
        },
        _ => unreachable!("literal handled above"),
    }
}

fn string_function(name: &str) -> Option<StringFunction> {
    match name.to_ascii_lowercase().as_str() {
        "upper" => Some(StringFunction::Upper),
        "lower" => Some(StringFunction::Lower),
        _ => None,
    }
}

fn apply_binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Expression {
    match op {
        BinaryOp::Eq => Expression::comparison(ComparisonOp::Eq, lhs, rhs),
        BinaryOp::NotEq => Expression::comparison(ComparisonOp::NotEq, lhs, rhs),
        BinaryOp::Lt => Expression::comparison(ComparisonOp::Lt, lhs, rhs),
        BinaryOp::LtEq => Expression::comparison(ComparisonOp::LtEq, lhs, rhs),
        BinaryOp::Gt => Expression::comparison(ComparisonOp::Gt, lhs, rhs),
        BinaryOp::GtEq => Expression::comparison(ComparisonOp::GtEq, lhs, rhs),
        BinaryOp::And => Expression::logic(LogicOp::And, lhs, rhs),
        BinaryOp::Or => Expression::logic(LogicOp::Or, lhs, rhs),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let op = match op {
                BinaryOp::Add => ArithmeticOp::Add,
                BinaryOp::Sub => ArithmeticOp::Sub,
                BinaryOp::Mul => ArithmeticOp::Mul,
                BinaryOp::Div => ArithmeticOp::Div,
                _ => ArithmeticOp::Mod,
            };
            Expression::Arithmetic { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
        }
        BinaryOp::L2Dist | BinaryOp::IpDist | BinaryOp::CosineDist => {
            let kind = match op {
                BinaryOp::L2Dist => DistanceKind::L2,
                BinaryOp::IpDist => DistanceKind::InnerProduct,
                _ => DistanceKind::Cosine,
            };
            Expression::VectorDistance { kind, lhs: Box::new(lhs), rhs: Box::new(rhs) }
        }
    }
}

/// Splits a flat expression over a join's combined scope into two-sided
/// column references at `left_len`.
fn split_join_sides(expr: &Expression, left_len: usize) -> Expression {
    match expr {
        Expression::ColumnValue { col_idx, col, .. } => {
            if *col_idx < left_len {
                Expression::column(0, *col_idx, col.clone())
            } else {
                Expression::column(1, *col_idx - left_len, col.clone())
            }
        }
        Expression::Constant { .. } => expr.clone(),
        Expression::Comparison { op, lhs, rhs } => Expression::Comparison {
            op: *op,
            lhs: Box::new(split_join_sides(lhs, left_len)),
            rhs: Box::new(split_join_sides(rhs, left_len)),
        },
        Expression::Arithmetic { op, lhs, rhs } => Expression::Arithmetic {
            op: *op,
            lhs: Box::new(split_join_sides(lhs, left_len)),
            rhs: Box::new(split_join_sides(rhs, left_len)),
        },
        Expression::Logic { op, lhs, rhs } => Expression::Logic {
            op: *op,
            lhs: Box::new(split_join_sides(lhs, left_len)),
            rhs: Box::new(split_join_sides(rhs, left_len)),
        },
        Expression::VectorDistance { kind, lhs, rhs } => Expression::VectorDistance {
            kind: *kind,
            lhs: Box::new(split_join_sides(lhs, left_len)),
            rhs: Box::new(split_join_sides(rhs, left_len)),
        },
        Expression::StringCall { function, input } => Expression::StringCall {
            function: *function,
            input: Box::new(split_join_sides(input, left_len)),
        },
    }
}

// ----------------------------------------------------------------------
// FROM clause
// ----------------------------------------------------------------------

fn bind_table_ref(catalog: &Catalog, table_ref: &TableRef<'_>) -> Result<(Arc<PlanNode>, Scope)> {
    match table_ref {
        TableRef::Table { name, alias } => {
            let info = catalog
                .table(name)
                .ok_or_else(|| invalid(format!("no such table: {name}")))?;
            let qualifier = alias.unwrap_or(name).to_string();
            let scope = Scope {
                columns: info
                    .schema
                    .columns()
                    .iter()
                    .map(|c| ScopeColumn { qualifier: Some(qualifier.clone()), column: c.clone() })
                    .collect(),
            };
            let plan = Arc::new(PlanNode::SeqScan(SeqScanNode {
                schema: info.schema.clone(),
                table_oid: info.oid,
                table_name: info.name.clone(),
                predicate: None,
            }));
            Ok((plan, scope))
        }
        TableRef::Join { left, right, join_type, on } => {
            let (left_plan, left_scope) = bind_table_ref(catalog, left)?;
            let (right_plan, right_scope) = bind_table_ref(catalog, right)?;
            let left_len = left_scope.columns.len();

            let mut columns = left_scope.columns;
            columns.extend(right_scope.columns);
            let scope = Scope { columns };
            let schema = Schema::new(scope.columns.iter().map(|sc| sc.column.clone()).collect());

            let flat = bind_expr(on, &scope)?;
            let predicate = split_join_sides(&flat, left_len);
            let plan = Arc::new(PlanNode::NestedLoopJoin(NestedLoopJoinNode {
                schema,
                left: left_plan,
                right: right_plan,
                predicate: Some(predicate),
                join_type: match join_type {
                    AstJoinType::Inner => JoinType::Inner,
                    AstJoinType::Left => JoinType::Left,
                },
            }));
            Ok((plan, scope))
        }
    }
}

// ----------------------------------------------------------------------
// Aggregation plumbing
// ----------------------------------------------------------------------

#[derive(Clone, Copy)]
struct AggCall<'a> {
    ty: AggregationType,
    arg: Option<&'a Expr<'a>>,
    source: &'a Expr<'a>,
}

fn aggregation_type(name: &str, star: bool) -> Result<AggregationType> {
    let ty = match (name.to_ascii_lowercase().as_str(), star) {
        ("count", true) => AggregationType::CountStar,
        ("count", false) => AggregationType::Count,
        ("sum", false) => AggregationType::Sum,
        ("min", false) => AggregationType::Min,
        ("max", false) => AggregationType::Max,
        (other, _) => return Err(invalid(format!("unknown aggregate function: {other}"))),
    };
    Ok(ty)
}

fn collect_aggregates<'a>(expr: &'a Expr<'a>, out: &mut Vec<AggCall<'a>>) -> Result<()> {
    match expr {
        Expr::FnCall { name, arg, star } => {
            if string_function(name).is_some() {
                if let Some(arg) = arg {
                    collect_aggregates(arg, out)?;
                }
                return Ok(());
            }
            let ty = aggregation_type(name, *star)?;
            if !out.iter().any(|c| c.source == expr) {
                out.push(AggCall { ty, arg: *arg, source: expr });
            }
            Ok(())
        }
        Expr::Binary { lhs, rhs, .. } => {
            collect_aggregates(lhs, out)?;
            collect_aggregates(rhs, out)
        }
        Expr::Neg(inner) => collect_aggregates(inner, out),
        _ => Ok(()),
    }
}

/// Binds an expression sitting above the aggregation: aggregate calls and
/// GROUP BY expressions become references into the aggregation's output.
fn bind_over_aggregation(
    expr: &Expr<'_>,
    group_sources: &[&Expr<'_>],
    agg_calls: &[AggCall<'_>],
    agg_schema: &Schema,
) -> Result<Expression> {
    if let Some(pos) = group_sources.iter().position(|g| *g == expr) {
        return Ok(Expression::column(0, pos, agg_schema.column(pos).clone()));
    }
    if let Expr::FnCall { name, arg, .. } = expr {
        if let Some(function) = string_function(name) {
            let Some(arg) = arg else {
                return Err(invalid(format!("{}() takes one argument", function.name())));
            };
            let input = bind_over_aggregation(arg, group_sources, agg_calls, agg_schema)?;
            return Ok(Expression::StringCall { function, input: Box::new(input) });
        }
        let pos = agg_calls
            .iter()
            .position(|c| c.source == expr)
            .expect("aggregate collected before rebinding");
        let idx = group_sources.len() + pos;
        return Ok(Expression::column(0, idx, agg_schema.column(idx).clone()));
    }
    if let Some(value) = literal_value(expr) {
        return Ok(Expression::constant(value));
    }
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            let lhs = bind_over_aggregation(lhs, group_sources, agg_calls, agg_schema)?;
            let rhs = bind_over_aggregation(rhs, group_sources, agg_calls, agg_schema)?;
            Ok(apply_binary(*op, lhs, rhs))
        }
        Expr::Neg(inner) => {
            let inner = bind_over_aggregation(inner, group_sources, agg_calls, agg_schema)?;
            Ok(Expression::Arithmetic {
                op: ArithmeticOp::Sub,
                lhs: Box::new(Expression::constant(Value::BigInt(0))),
                rhs: Box::new(inner),
            })
        }
        Expr::Column { name, .. } => Err(invalid(format!(
            "column {name} must appear in the GROUP BY clause or inside an aggregate"
        ))),
        _ => unreachable!("literal handled above"),
    }
}

// ----------------------------------------------------------------------
// SELECT
// ----------------------------------------------------------------------

fn bind_select(catalog: &Catalog, select: &SelectStmt<'_>) -> Result<Arc<PlanNode>> {
    ensure!(
        !select.projections.is_empty(),
        DbError::InvalidInput("empty SELECT list".into())
    );

    // FROM
    let (mut plan, scope) = match select.from {
        Some(table_ref) => bind_table_ref(catalog, table_ref)?,
        None => {
            let schema = Schema::new(Vec::new());
            (
                Arc::new(PlanNode::Values(ValuesNode { schema, rows: vec![Vec::new()] })),
                Scope { columns: Vec::new() },
            )
        }
    };

    // WHERE
    if let Some(filter) = select.filter {
        let predicate = bind_expr(filter, &scope)?;
        plan = Arc::new(PlanNode::Filter(FilterNode {
            schema: plan.output_schema().clone(),
            child: plan,
            predicate,
        }));
    }

    // Aggregation
    let mut agg_calls: Vec<AggCall<'_>> = Vec::new();
    for item in select.projections {
        if let SelectItem::Expr { expr, .. } = item {
            collect_aggregates(expr, &mut agg_calls)?;
        }
    }
    for (_, expr) in select.order_by {
        collect_aggregates(expr, &mut agg_calls)?;
    }
    if let Some(having) = select.having {
        collect_aggregates(having, &mut agg_calls)?;
    }
    let has_aggregation = !agg_calls.is_empty() || !select.group_by.is_empty();

    let mut agg_info: Option<(Vec<&Expr<'_>>, Vec<AggCall<'_>>, Schema)> = None;
    if has_aggregation {
        let mut group_exprs = Vec::new();
        let mut columns = Vec::new();
        for group in select.group_by {
            let bound = bind_expr(group, &scope)?;
            columns.push(bound.return_type());
            group_exprs.push(bound);
        }
        let mut aggregates = Vec::new();
        let mut agg_types = Vec::new();
        for call in &agg_calls {
            let bound_arg = match call.arg {
                Some(arg) => bind_expr(arg, &scope)?,
                None => Expression::constant(Value::BigInt(1)),
            };
            columns.push(aggregate_result_column(call.ty, &bound_arg));
            aggregates.push(bound_arg);
            agg_types.push(call.ty);
        }
        let agg_schema = Schema::new(columns);
        plan = Arc::new(PlanNode::Aggregation(AggregationNode {
            schema: agg_schema.clone(),
            child: plan,
            group_bys: group_exprs,
            aggregates,
            agg_types,
        }));
        agg_info = Some((select.group_by.to_vec(), agg_calls, agg_schema));
    }

    let bind_above = |expr: &Expr<'_>| -> Result<Expression> {
        match &agg_info {
            Some((groups, calls, schema)) => bind_over_aggregation(expr, groups, calls, schema),
            None => bind_expr(expr, &scope),
        }
    };

    // HAVING
    if let Some(having) = select.having {
        ensure!(
            has_aggregation,
            DbError::InvalidInput("HAVING requires GROUP BY or an aggregate".into())
        );
        let predicate = bind_above(having)?;
        plan = Arc::new(PlanNode::Filter(FilterNode {
            schema: plan.output_schema().clone(),
            child: plan,
            predicate,
        }));
    }

    // ORDER BY / LIMIT (below the projection)
    if !select.order_by.is_empty() {
        let mut order_bys = Vec::new();
        for (dir, expr) in select.order_by {
            let bound = bind_above(expr)?;
            let dir = match dir {
                OrderDir::Asc => OrderByType::Asc,
                OrderDir::Desc => OrderByType::Desc,
            };
            order_bys.push((dir, bound));
        }
        plan = Arc::new(PlanNode::Sort(SortNode {
            schema: plan.output_schema().clone(),
            child: plan,
            order_bys,
        }));
    }
    if let Some(limit) = select.limit {
        plan = Arc::new(PlanNode::Limit(LimitNode {
            schema: plan.output_schema().clone(),
            child: plan,
            limit: limit as usize,
        }));
    }

    // Projection
    let mut expressions = Vec::new();
    let mut out_columns = Vec::new();
    for item in select.projections {
        match item {
            SelectItem::Star => {
                ensure!(
                    !has_aggregation,
                    DbError::InvalidInput("SELECT * cannot be combined with GROUP BY".into())
                );
                for (idx, sc) in scope.columns.iter().enumerate() {
                    expressions.push(Expression::column(0, idx, sc.column.clone()));
                    out_columns.push(sc.column.clone());
                }
            }
            SelectItem::Expr { expr, alias } => {
                let bound = bind_above(expr)?;
                let column = match alias {
                    Some(alias) => bound.return_type().renamed(*alias),
                    None => bound.return_type(),
                };
                out_columns.push(column);
                expressions.push(bound);
            }
        }
    }
    Ok(Arc::new(PlanNode::Projection(ProjectionNode {
        schema: Schema::new(out_columns),
        child: plan,
        expressions,
    })))
}

// ----------------------------------------------------------------------
// DML
// ----------------------------------------------------------------------

fn bind_insert(
    catalog: &Catalog,
    table: &str,
    rows: &[&[&Expr<'_>]],
) -> Result<Arc<PlanNode>> {
    let info = catalog
        .table(table)
        .ok_or_else(|| invalid(format!("no such table: {table}")))?;
    let mut bound_rows = Vec::with_capacity(rows.len());
    for row in rows {
        ensure!(
            row.len() == info.schema.len(),
            DbError::InvalidInput(format!(
                "INSERT row has {} values, table {} has {} columns",
                row.len(),
                table,
                info.schema.len()
            ))
        );
        let mut bound = Vec::with_capacity(row.len());
        for (idx, expr) in row.iter().enumerate() {
            let value = literal_value(expr)
                .ok_or_else(|| invalid("INSERT values must be literals"))?;
            let target = info.schema.column(idx);
            let value = match (&value, target.type_id()) {
                (Value::Vector(v), TypeId::Vector) => {
                    ensure!(
                        v.len() == target.length() as usize,
                        DbError::InvalidInput(format!(
                            "column '{}' expects VECTOR({}), got dimension {}",
                            target.name(),
                            target.length(),
                            v.len()
                        ))
                    );
                    value
                }
                (Value::Varchar(_), TypeId::Varchar) => value,
                _ => value.cast_to(target.type_id())?,
            };
            bound.push(Expression::constant(value));
        }
        bound_rows.push(bound);
    }
    let values = Arc::new(PlanNode::Values(ValuesNode {
        schema: info.schema.clone(),
        rows: bound_rows,
    }));
    Ok(Arc::new(PlanNode::Insert(InsertNode {
        schema: mutation_schema(),
        child: values,
        table_oid: info.oid,
        table_name: info.name.clone(),
    })))
}

fn scan_with_filter(
    catalog: &Catalog,
    table: &str,
    filter: Option<&Expr<'_>>,
) -> Result<(Arc<PlanNode>, Scope, Arc<crate::catalog::TableInfo>)> {
    let info = catalog
        .table(table)
        .ok_or_else(|| invalid(format!("no such table: {table}")))?;
    let scope = Scope {
        columns: info
            .schema
            .columns()
            .iter()
            .map(|c| ScopeColumn { qualifier: Some(info.name.clone()), column: c.clone() })
            .collect(),
    };
    let mut plan = Arc::new(PlanNode::SeqScan(SeqScanNode {
        schema: info.schema.clone(),
        table_oid: info.oid,
        table_name: info.name.clone(),
        predicate: None,
    }));
    if let Some(filter) = filter {
        let predicate = bind_expr(filter, &scope)?;
        plan = Arc::new(PlanNode::Filter(FilterNode {
            schema: plan.output_schema().clone(),
            child: plan,
            predicate,
        }));
    }
    Ok((plan, scope, info))
}

fn bind_update(
    catalog: &Catalog,
    table: &str,
    assignments: &[(&str, &Expr<'_>)],
    filter: Option<&Expr<'_>>,
) -> Result<Arc<PlanNode>> {
    let (child, scope, info) = scan_with_filter(catalog, table, filter)?;
    let mut targets: Vec<Expression> = info
        .schema
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| Expression::column(0, idx, col.clone()))
        .collect();
    for (column, expr) in assignments {
        let idx = info
            .schema
            .index_of(column)
            .ok_or_else(|| invalid(format!("no such column: {table}.{column}")))?;
        targets[idx] = bind_expr(expr, &scope)?;
    }
    Ok(Arc::new(PlanNode::Update(UpdateNode {
        schema: mutation_schema(),
        child,
        table_oid: info.oid,
        table_name: info.name.clone(),
        target_expressions: targets,
    })))
}

fn bind_delete(
    catalog: &Catalog,
    table: &str,
    filter: Option<&Expr<'_>>,
) -> Result<Arc<PlanNode>> {
    let (child, _, info) = scan_with_filter(catalog, table, filter)?;
    Ok(Arc::new(PlanNode::Delete(DeleteNode {
        schema: mutation_schema(),
        child,
        table_oid: info.oid,
        table_name: info.name.clone(),
    })))
}
