//! Hash aggregation and window functions.
//!
//! `AggregationExecutor` materializes its child on init, groups rows by the
//! encoded group-by key (NULLs group together, as SQL demands) and folds each
//! aggregate with SQL NULL semantics: COUNT(*) counts rows, COUNT counts
//! non-NULL inputs, SUM/MIN/MAX skip NULLs and stay NULL over an all-NULL
//! (or empty) group. With no GROUP BY clause an empty input still yields the
//! single initial row — `SELECT count(*) FROM empty` is 0, not nothing.

use super::Executor;
use crate::expression::Expression;
use crate::index::encode_key;
use crate::plan::{AggregationNode, AggregationType, WindowFunction, WindowNode};
use crate::storage::{Rid, Tuple};
use crate::types::{Column, Schema, TypeId, Value};
use eyre::Result;
use hashbrown::HashMap;

/// The output column an aggregate call produces; shared with the binder so
/// plan schemas and accumulator results always agree.
pub fn aggregate_result_column(ty: AggregationType, arg: &Expression) -> Column {
    let name = format!("{}({arg})", ty.name());
    match ty {
        AggregationType::CountStar | AggregationType::Count => Column::new(name, TypeId::BigInt),
        AggregationType::Sum => {
            if arg.return_type().type_id() == TypeId::Decimal {
                Column::new(name, TypeId::Decimal)
            } else {
                Column::new(name, TypeId::BigInt)
            }
        }
        AggregationType::Min | AggregationType::Max => arg.return_type().renamed(name),
    }
}

fn initial_value(ty: AggregationType, result: &Column) -> Value {
    match ty {
        AggregationType::CountStar | AggregationType::Count => Value::BigInt(0),
        _ => Value::Null(result.type_id()),
    }
}

fn combine(ty: AggregationType, acc: &Value, input: &Value, result: &Column) -> Result<Value> {
    match ty {
        AggregationType::CountStar => match acc {
            Value::BigInt(n) => Ok(Value::BigInt(n + 1)),
            _ => unreachable!("count accumulator is BIGINT"),
        },
        AggregationType::Count => match acc {
            Value::BigInt(n) if !input.is_null() => Ok(Value::BigInt(n + 1)),
            Value::BigInt(n) => Ok(Value::BigInt(*n)),
            _ => unreachable!("count accumulator is BIGINT"),
        },
        AggregationType::Sum => {
            if input.is_null() {
                return Ok(acc.clone());
            }
            if acc.is_null() {
                return input.cast_to(result.type_id());
            }
            acc.arithmetic(input, '+')?.cast_to(result.type_id())
        }
        AggregationType::Min | AggregationType::Max => {
            if input.is_null() {
                return Ok(acc.clone());
            }
            if acc.is_null() {
                return Ok(input.clone());
            }
            let ord = acc.compare(input)?.unwrap_or(std::cmp::Ordering::Equal);
            let take_input = match ty {
                AggregationType::Min => ord == std::cmp::Ordering::Greater,
                _ => ord == std::cmp::Ordering::Less,
            };
            Ok(if take_input { input.clone() } else { acc.clone() })
        }
    }
}

pub struct AggregationExecutor {
    node: AggregationNode,
    child: Box<dyn Executor>,
    output: Vec<Tuple>,
    pos: usize,
}

impl AggregationExecutor {
    pub fn new(node: AggregationNode, child: Box<dyn Executor>) -> Self {
        Self { node, child, output: Vec::new(), pos: 0 }
    }

    fn result_columns(&self) -> Vec<Column> {
        self.node
            .agg_types
            .iter()
            .zip(self.node.aggregates.iter())
            .map(|(&ty, arg)| aggregate_result_column(ty, arg))
            .collect()
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.output.clear();
        self.pos = 0;

        let results = self.result_columns();
        let child_schema = self.child.schema().clone();
        let mut groups: HashMap<Vec<u8>, (Vec<Value>, Vec<Value>)> = HashMap::new();
        let mut order: Vec<Vec<u8>> = Vec::new();

        while let Some((tuple, _)) = self.child.next()? {
            let group: Vec<Value> = self
                .node
                .group_bys
                .iter()
                .map(|e| e.evaluate(&tuple, &child_schema))
                .collect::<Result<_>>()?;
            let key = encode_key(&group);
            if !groups.contains_key(&key) {
                let initial = self
                    .node
                    .agg_types
                    .iter()
                    .zip(results.iter())
                    .map(|(&ty, col)| initial_value(ty, col))
                    .collect();
                groups.insert(key.clone(), (group, initial));
                order.push(key.clone());
            }
            let entry = groups.get_mut(&key).unwrap();
            for (i, (&ty, expr)) in self
                .node
                .agg_types
                .iter()
                .zip(self.node.aggregates.iter())
                .enumerate()
            {
                let input = expr.evaluate(&tuple, &child_schema)?;
                entry.1[i] = combine(ty, &entry.1[i], &input, &results[i])?;
            }
        }

        if groups.is_empty() && self.node.group_bys.is_empty() {
            let initial: Vec<Value> = self
                .node
                .agg_types
                .iter()
                .zip(results.iter())
                .map(|(&ty, col)| initial_value(ty, col))
                .collect();
            self.output.push(Tuple::from_values(&initial, &self.node.schema)?);
            return Ok(());
        }

        for key in order {
            let (group, accs) = groups.remove(&key).expect("group recorded in order");
            let mut values = group;
            values.extend(accs);
            self.output.push(Tuple::from_values(&values, &self.node.schema)?);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some(tuple) = self.output.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some((tuple.clone(), Rid::INVALID)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

/// ROW_NUMBER / RANK over a partition + order clause. The input is fully
/// materialized, sorted by (partition key, order key), and numbered in one
/// pass; ties (equal order keys) share a RANK but not a ROW_NUMBER.
pub struct WindowExecutor {
    node: WindowNode,
    child: Box<dyn Executor>,
    output: Vec<Tuple>,
    pos: usize,
}

impl WindowExecutor {
    pub fn new(node: WindowNode, child: Box<dyn Executor>) -> Self {
        Self { node, child, output: Vec::new(), pos: 0 }
    }
}

impl Executor for WindowExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.output.clear();
        self.pos = 0;

        let child_schema = self.child.schema().clone();
        let mut rows: Vec<(Vec<u8>, Vec<u8>, Tuple)> = Vec::new();
        while let Some((tuple, _)) = self.child.next()? {
            let partition: Vec<Value> = self
                .node
                .partition_by
                .iter()
                .map(|e| e.evaluate(&tuple, &child_schema))
                .collect::<Result<_>>()?;
            let order = super::sort::order_key(&self.node.order_by, &tuple, &child_schema)?;
            rows.push((encode_key(&partition), order, tuple));
        }
        rows.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let mut row_number = 0i64;
        let mut rank = 0i64;
        let mut current_partition: Option<Vec<u8>> = None;
        let mut previous_order: Option<Vec<u8>> = None;
        for (partition, order, tuple) in rows {
            if current_partition.as_ref() != Some(&partition) {
                current_partition = Some(partition);
                previous_order = None;
                row_number = 0;
                rank = 0;
            }
            row_number += 1;
            if previous_order.as_ref() != Some(&order) {
                rank = row_number;
                previous_order = Some(order);
            }
            let assigned = match self.node.function {
                WindowFunction::RowNumber => row_number,
                WindowFunction::Rank => rank,
            };
            let mut values = tuple.values(&child_schema)?;
            values.push(Value::BigInt(assigned));
            self.output.push(Tuple::from_values(&values, &self.node.schema)?);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>> {
        let Some(tuple) = self.output.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some((tuple.clone(), Rid::INVALID)))
    }

    fn schema(&self) -> &Schema {
        &self.node.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::scan::MockScanExecutor;
    use crate::plan::MockScanNode;
    use std::sync::Arc;

    fn mock(rows: Vec<Vec<Value>>) -> Box<dyn Executor> {
        Box::new(MockScanExecutor::new(MockScanNode {
            schema: Schema::new(vec![
                Column::new("g", TypeId::Integer),
                Column::new("x", TypeId::Integer),
            ]),
            rows,
        }))
    }

    fn col(idx: usize, name: &str) -> Expression {
        Expression::column(0, idx, Column::new(name, TypeId::Integer))
    }

    fn agg_node(
        group_bys: Vec<Expression>,
        aggregates: Vec<Expression>,
        agg_types: Vec<AggregationType>,
    ) -> AggregationNode {
        let mut cols: Vec<Column> = group_bys.iter().map(|e| e.return_type()).collect();
        cols.extend(
            agg_types
                .iter()
                .zip(aggregates.iter())
                .map(|(&ty, e)| aggregate_result_column(ty, e)),
        );
        AggregationNode {
            schema: Schema::new(cols),
            child: Arc::new(crate::plan::PlanNode::MockScan(MockScanNode {
                schema: Schema::new(vec![Column::new("g", TypeId::Integer)]),
                rows: Vec::new(),
            })),
            group_bys,
            aggregates,
            agg_types,
        }
    }

    fn drain(mut exec: AggregationExecutor) -> Vec<Vec<Value>> {
        exec.init().unwrap();
        let mut out = Vec::new();
        while let Some((tuple, _)) = exec.next().unwrap() {
            out.push(tuple.values(&exec.node.schema).unwrap());
        }
        out
    }

    fn rows() -> Vec<Vec<Value>> {
        vec![
            vec![Value::Integer(1), Value::Integer(10)],
            vec![Value::Integer(2), Value::Integer(5)],
            vec![Value::Integer(1), Value::Integer(20)],
            vec![Value::Integer(2), Value::Null(TypeId::Integer)],
        ]
    }

    #[test]
    fn grouped_count_sum_min_max() {
        let node = agg_node(
            vec![col(0, "g")],
            vec![col(1, "x"), col(1, "x"), col(1, "x"), col(1, "x")],
            vec![
                AggregationType::Count,
                AggregationType::Sum,
                AggregationType::Min,
                AggregationType::Max,
            ],
        );
        let out = drain(AggregationExecutor::new(node, mock(rows())));
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0],
            vec![
                Value::Integer(1),
                Value::BigInt(2),
                Value::BigInt(30),
                Value::Integer(10),
                Value::Integer(20),
            ]
        );
        // NULL input: counted by neither COUNT nor SUM/MIN/MAX.
        assert_eq!(
            out[1],
            vec![
                Value::Integer(2),
                Value::BigInt(1),
                Value::BigInt(5),
                Value::Integer(5),
                Value::Integer(5),
            ]
        );
    }

    #[test]
    fn empty_input_without_group_by_emits_initials() {
        let node = agg_node(
            vec![],
            vec![Expression::constant(Value::Integer(1)), col(1, "x")],
            vec![AggregationType::CountStar, AggregationType::Sum],
        );
        let out = drain(AggregationExecutor::new(node, mock(vec![])));
        assert_eq!(out, vec![vec![Value::BigInt(0), Value::Null(TypeId::BigInt)]]);
    }

    #[test]
    fn empty_input_with_group_by_emits_nothing() {
        let node = agg_node(
            vec![col(0, "g")],
            vec![Expression::constant(Value::Integer(1))],
            vec![AggregationType::CountStar],
        );
        let out = drain(AggregationExecutor::new(node, mock(vec![])));
        assert!(out.is_empty());
    }

    #[test]
    fn window_row_number_and_rank() {
        let mk = |f| WindowNode {
            schema: Schema::new(vec![
                Column::new("g", TypeId::Integer),
                Column::new("x", TypeId::Integer),
                Column::new("w", TypeId::BigInt),
            ]),
            child: Arc::new(crate::plan::PlanNode::MockScan(MockScanNode {
                schema: Schema::new(vec![Column::new("g", TypeId::Integer)]),
                rows: Vec::new(),
            })),
            partition_by: vec![col(0, "g")],
            order_by: vec![(crate::plan::OrderByType::Asc, col(1, "x"))],
            function: f,
        };
        let rows = vec![
            vec![Value::Integer(1), Value::Integer(7)],
            vec![Value::Integer(1), Value::Integer(7)],
            vec![Value::Integer(1), Value::Integer(9)],
            vec![Value::Integer(2), Value::Integer(1)],
        ];

        let mut exec = WindowExecutor::new(mk(WindowFunction::Rank), mock(rows.clone()));
        exec.init().unwrap();
        let mut ranks = Vec::new();
        while let Some((tuple, _)) = exec.next().unwrap() {
            ranks.push(tuple.values(&exec.node.schema).unwrap()[2].clone());
        }
        assert_eq!(
            ranks,
            vec![Value::BigInt(1), Value::BigInt(1), Value::BigInt(3), Value::BigInt(1)]
        );

        let mut exec = WindowExecutor::new(mk(WindowFunction::RowNumber), mock(rows));
        exec.init().unwrap();
        let mut numbers = Vec::new();
        while let Some((tuple, _)) = exec.next().unwrap() {
            numbers.push(tuple.values(&exec.node.schema).unwrap()[2].clone());
        }
        assert_eq!(
            numbers,
            vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(3), Value::BigInt(1)]
        );
    }
}
