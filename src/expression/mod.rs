//! # Expression Tree
//!
//! Bound, typed expressions evaluated by executors. One enum covers the
//! capability set the planner emits:
//!
//! | Variant | Produces |
//! |---------|----------|
//! | `ColumnValue` | a cell from the input tuple (or one side of a join) |
//! | `Constant` | a literal |
//! | `Comparison` | three-valued boolean from `=`, `<>`, `<`, `<=`, `>`, `>=` |
//! | `Arithmetic` | numeric `+ - * / %` |
//! | `Logic` | SQL `AND`/`OR` over three-valued booleans |
//! | `VectorDistance` | `<->` / `<#>` / `<=>` between two vectors |
//!
//! Expressions are immutable and `Clone`; optimizer rewrites share subtrees
//! freely. NULL handling follows SQL: comparisons with a NULL operand yield
//! NULL, and predicates treat NULL as not-satisfied.

use crate::error::DbError;
use crate::index::{distance, DistanceKind};
use crate::storage::Tuple;
use crate::types::{Column, Schema, TypeId, Value};
use eyre::{ensure, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOp {
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            ComparisonOp::Eq => ord == Ordering::Equal,
            ComparisonOp::NotEq => ord != Ordering::Equal,
            ComparisonOp::Lt => ord == Ordering::Less,
            ComparisonOp::LtEq => ord != Ordering::Greater,
            ComparisonOp::Gt => ord == Ordering::Greater,
            ComparisonOp::GtEq => ord != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    pub fn symbol(self) -> char {
        match self {
            ArithmeticOp::Add => '+',
            ArithmeticOp::Sub => '-',
            ArithmeticOp::Mul => '*',
            ArithmeticOp::Div => '/',
            ArithmeticOp::Mod => '%',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFunction {
    Upper,
    Lower,
}

impl StringFunction {
    pub fn name(self) -> &'static str {
        match self {
            StringFunction::Upper => "upper",
            StringFunction::Lower => "lower",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A cell of the input. `tuple_idx` selects the join side (0 = left /
    /// only input, 1 = right).
    ColumnValue { tuple_idx: usize, col_idx: usize, col: Column },
    Constant { value: Value },
    Comparison { op: ComparisonOp, lhs: Box<Expression>, rhs: Box<Expression> },
    Arithmetic { op: ArithmeticOp, lhs: Box<Expression>, rhs: Box<Expression> },
    Logic { op: LogicOp, lhs: Box<Expression>, rhs: Box<Expression> },
    VectorDistance { kind: DistanceKind, lhs: Box<Expression>, rhs: Box<Expression> },
    StringCall { function: StringFunction, input: Box<Expression> },
}

enum EvalInput<'a> {
    Single(&'a Tuple, &'a Schema),
    Join { left: &'a Tuple, left_schema: &'a Schema, right: &'a Tuple, right_schema: &'a Schema },
}

impl Expression {
    pub fn column(tuple_idx: usize, col_idx: usize, col: Column) -> Expression {
        Expression::ColumnValue { tuple_idx, col_idx, col }
    }

    pub fn constant(value: Value) -> Expression {
        Expression::Constant { value }
    }

    pub fn comparison(op: ComparisonOp, lhs: Expression, rhs: Expression) -> Expression {
        Expression::Comparison { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn logic(op: LogicOp, lhs: Expression, rhs: Expression) -> Expression {
        Expression::Logic { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn evaluate(&self, tuple: &Tuple, schema: &Schema) -> Result<Value> {
        self.eval(&EvalInput::Single(tuple, schema))
    }

    pub fn evaluate_join(
        &self,
        left: &Tuple,
        left_schema: &Schema,
        right: &Tuple,
        right_schema: &Schema,
    ) -> Result<Value> {
        self.eval(&EvalInput::Join { left, left_schema, right, right_schema })
    }

    fn eval(&self, input: &EvalInput<'_>) -> Result<Value> {
        match self {
            Expression::ColumnValue { tuple_idx, col_idx, .. } => match input {
                EvalInput::Single(tuple, schema) => {
                    ensure!(
                        *tuple_idx == 0,
                        DbError::Execution("join column referenced outside a join".into())
                    );
                    tuple.value(schema, *col_idx)
                }
                EvalInput::Join { left, left_schema, right, right_schema } => {
                    if *tuple_idx == 0 {
                        left.value(left_schema, *col_idx)
                    } else {
                        right.value(right_schema, *col_idx)
                    }
                }
            },
            Expression::Constant { value } => Ok(value.clone()),
            Expression::Comparison { op, lhs, rhs } => {
                let l = lhs.eval(input)?;
                let r = rhs.eval(input)?;
                match l.compare(&r)? {
                    None => Ok(Value::Null(TypeId::Boolean)),
                    Some(ord) => Ok(Value::Boolean(op.matches(ord))),
                }
            }
            Expression::Arithmetic { op, lhs, rhs } => {
                let l = lhs.eval(input)?;
                let r = rhs.eval(input)?;
                l.arithmetic(&r, op.symbol())
            }
            Expression::Logic { op, lhs, rhs } => {
                let l = lhs.eval(input)?.as_bool_or_null()?;
                let r = rhs.eval(input)?.as_bool_or_null()?;
                Ok(match op {
                    LogicOp::And => match (l, r) {
                        (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                        (Some(true), Some(true)) => Value::Boolean(true),
                        _ => Value::Null(TypeId::Boolean),
                    },
                    LogicOp::Or => match (l, r) {
                        (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                        (Some(false), Some(false)) => Value::Boolean(false),
                        _ => Value::Null(TypeId::Boolean),
                    },
                })
            }
            Expression::StringCall { function, input: arg } => {
                let v = arg.eval(input)?;
                match v {
                    Value::Null(_) => Ok(Value::Null(TypeId::Varchar)),
                    Value::Varchar(s) => Ok(Value::Varchar(match function {
                        StringFunction::Upper => s.to_uppercase(),
                        StringFunction::Lower => s.to_lowercase(),
                    })),
                    other => Err(DbError::Execution(format!(
                        "{}() expects VARCHAR, got {}",
                        function.name(),
                        other.type_id()
                    ))
                    .into()),
                }
            }
            Expression::VectorDistance { kind, lhs, rhs } => {
                let l = lhs.eval(input)?;
                let r = rhs.eval(input)?;
                if l.is_null() || r.is_null() {
                    return Ok(Value::Null(TypeId::Decimal));
                }
                let a = l.as_vector()?;
                let b = r.as_vector()?;
                ensure!(
                    a.len() == b.len(),
                    DbError::Execution(format!(
                        "vector distance between dimensions {} and {}",
                        a.len(),
                        b.len()
                    ))
                );
                Ok(Value::Decimal(distance::compute(*kind, false, a, b)))
            }
        }
    }

    /// The column (type + layout) this expression produces.
    pub fn return_type(&self) -> Column {
        match self {
            Expression::ColumnValue { col, .. } => col.clone(),
            Expression::Constant { value } => match value {
                Value::Varchar(s) => Column::new_varchar(self.to_string(), s.len() as u32),
                Value::Vector(v) => Column::new_vector(self.to_string(), v.len() as u32),
                other => Column::new(self.to_string(), other.type_id()),
            },
            Expression::Comparison { .. } | Expression::Logic { .. } => {
                Column::new(self.to_string(), TypeId::Boolean)
            }
            Expression::Arithmetic { lhs, rhs, .. } => {
                let ty = if lhs.return_type().type_id() == TypeId::Decimal
                    || rhs.return_type().type_id() == TypeId::Decimal
                {
                    TypeId::Decimal
                } else {
                    TypeId::BigInt
                };
                Column::new(self.to_string(), ty)
            }
            Expression::VectorDistance { .. } => Column::new(self.to_string(), TypeId::Decimal),
            Expression::StringCall { input, .. } => {
                Column::new_varchar(self.to_string(), input.return_type().length())
            }
        }
    }

    /// Walks the tree, yielding every node.
    pub fn visit(&self, f: &mut dyn FnMut(&Expression)) {
        f(self);
        match self {
            Expression::ColumnValue { .. } | Expression::Constant { .. } => {}
            Expression::Comparison { lhs, rhs, .. }
            | Expression::Arithmetic { lhs, rhs, .. }
            | Expression::Logic { lhs, rhs, .. }
            | Expression::VectorDistance { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
            Expression::StringCall { input, .. } => input.visit(f),
        }
    }
}

impl Value {
    /// Boolean reading with NULL passthrough; non-boolean values error.
    fn as_bool_or_null(&self) -> Result<Option<bool>> {
        match self {
            Value::Null(_) => Ok(None),
            Value::Boolean(b) => Ok(Some(*b)),
            other => Err(DbError::Execution(format!(
                "expected boolean operand, got {}",
                other.type_id()
            ))
            .into()),
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::ColumnValue { tuple_idx, col_idx, col } => {
                if col.name().is_empty() {
                    write!(f, "#{tuple_idx}.{col_idx}")
                } else {
                    write!(f, "{}", col.name())
                }
            }
            Expression::Constant { value } => match value {
                Value::Varchar(s) => write!(f, "'{s}'"),
                other => write!(f, "{other}"),
            },
            Expression::Comparison { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expression::Arithmetic { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expression::Logic { op, lhs, rhs } => {
                let word = match op {
                    LogicOp::And => "AND",
                    LogicOp::Or => "OR",
                };
                write!(f, "({lhs} {word} {rhs})")
            }
            Expression::VectorDistance { kind, lhs, rhs } => {
                write!(f, "({lhs} {} {rhs})", kind.operator())
            }
            Expression::StringCall { function, input } => {
                write!(f, "{}({input})", function.name())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("a", TypeId::Integer),
            Column::new("b", TypeId::Integer),
            Column::new_vector("v", 2),
        ])
    }

    fn row(a: i32, b: i32, v: [f64; 2]) -> Tuple {
        Tuple::from_values(
            &[Value::Integer(a), Value::Integer(b), Value::Vector(v.to_vec())],
            &schema(),
        )
        .unwrap()
    }

    fn col(idx: usize) -> Expression {
        Expression::column(0, idx, schema().column(idx).clone())
    }

    #[test]
    fn comparison_on_columns() {
        let tuple = row(3, 5, [0.0, 0.0]);
        let expr = Expression::comparison(ComparisonOp::Lt, col(0), col(1));
        assert_eq!(expr.evaluate(&tuple, &schema()).unwrap(), Value::Boolean(true));
        assert_eq!(expr.return_type().type_id(), TypeId::Boolean);
    }

    #[test]
    fn null_comparison_yields_null() {
        let tuple = Tuple::from_values(
            &[Value::Null(TypeId::Integer), Value::Integer(1), Value::Vector(vec![0.0, 0.0])],
            &schema(),
        )
        .unwrap();
        let expr = Expression::comparison(ComparisonOp::Eq, col(0), col(1));
        assert!(expr.evaluate(&tuple, &schema()).unwrap().is_null());
    }

    #[test]
    fn three_valued_logic() {
        let null = Expression::constant(Value::Null(TypeId::Boolean));
        let truth = Expression::constant(Value::Boolean(true));
        let lie = Expression::constant(Value::Boolean(false));
        let t = row(0, 0, [0.0, 0.0]);

        let and = Expression::logic(LogicOp::And, lie.clone(), null.clone());
        assert_eq!(and.evaluate(&t, &schema()).unwrap(), Value::Boolean(false));
        let and = Expression::logic(LogicOp::And, truth.clone(), null.clone());
        assert!(and.evaluate(&t, &schema()).unwrap().is_null());
        let or = Expression::logic(LogicOp::Or, truth, null.clone());
        assert_eq!(or.evaluate(&t, &schema()).unwrap(), Value::Boolean(true));
        let or = Expression::logic(LogicOp::Or, lie, null);
        assert!(or.evaluate(&t, &schema()).unwrap().is_null());
    }

    #[test]
    fn arithmetic_widens_to_bigint() {
        let t = row(6, 7, [0.0, 0.0]);
        let expr = Expression::Arithmetic {
            op: ArithmeticOp::Mul,
            lhs: Box::new(col(0)),
            rhs: Box::new(col(1)),
        };
        assert_eq!(expr.evaluate(&t, &schema()).unwrap(), Value::BigInt(42));
        assert_eq!(expr.return_type().type_id(), TypeId::BigInt);
    }

    #[test]
    fn vector_distance_between_column_and_constant() {
        let t = row(0, 0, [3.0, 4.0]);
        let expr = Expression::VectorDistance {
            kind: DistanceKind::L2,
            lhs: Box::new(col(2)),
            rhs: Box::new(Expression::constant(Value::Vector(vec![0.0, 0.0]))),
        };
        assert_eq!(expr.evaluate(&t, &schema()).unwrap(), Value::Decimal(5.0));
        assert_eq!(expr.to_string(), "(v <-> [0,0])");
    }

    #[test]
    fn join_evaluation_picks_sides() {
        let left_schema = Schema::new(vec![Column::new("l", TypeId::Integer)]);
        let right_schema = Schema::new(vec![Column::new("r", TypeId::Integer)]);
        let left = Tuple::from_values(&[Value::Integer(1)], &left_schema).unwrap();
        let right = Tuple::from_values(&[Value::Integer(1)], &right_schema).unwrap();

        let expr = Expression::comparison(
            ComparisonOp::Eq,
            Expression::column(0, 0, left_schema.column(0).clone()),
            Expression::column(1, 0, right_schema.column(0).clone()),
        );
        let out = expr
            .evaluate_join(&left, &left_schema, &right, &right_schema)
            .unwrap();
        assert_eq!(out, Value::Boolean(true));
    }

    #[test]
    fn string_functions_fold_case_and_pass_null() {
        let schema = Schema::new(vec![Column::new_varchar("s", 8)]);
        let upper = Expression::StringCall {
            function: StringFunction::Upper,
            input: Box::new(Expression::column(0, 0, schema.column(0).clone())),
        };
        let t = Tuple::from_values(&[Value::Varchar("MiXeD".into())], &schema).unwrap();
        assert_eq!(upper.evaluate(&t, &schema).unwrap(), Value::Varchar("MIXED".into()));
        assert_eq!(upper.to_string(), "upper(s)");
        assert_eq!(upper.return_type().type_id(), TypeId::Varchar);

        let t = Tuple::from_values(&[Value::Null(TypeId::Varchar)], &schema).unwrap();
        assert!(upper.evaluate(&t, &schema).unwrap().is_null());
    }

    #[test]
    fn dimension_mismatch_errors() {
        let t = row(0, 0, [1.0, 2.0]);
        let expr = Expression::VectorDistance {
            kind: DistanceKind::L2,
            lhs: Box::new(col(2)),
            rhs: Box::new(Expression::constant(Value::Vector(vec![1.0]))),
        };
        assert!(expr.evaluate(&t, &schema()).is_err());
    }
}
