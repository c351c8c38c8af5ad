//! # Runtime Value Representation
//!
//! `Value` is the typed runtime cell flowing between expressions, executors
//! and the tuple codec. NULL is a first-class variant that carries its
//! declared type tag so a NULL survives serialization under the right
//! column layout.
//!
//! ## Comparison Semantics
//!
//! - NULL compared to anything yields SQL UNKNOWN (`Ok(None)`); predicates
//!   treat UNKNOWN as false.
//! - Numeric types cross-compare inside the family (integers promote to i64,
//!   mixed int/decimal promote to f64).
//! - Any other cross-tag comparison is an `InvalidInput` error; the binder is
//!   expected to have rejected it, so hitting this at runtime means a literal
//!   slipped through with the wrong type.
//!
//! ## Arithmetic
//!
//! Checked integer arithmetic: overflow and division by zero surface as
//! `Execution` errors rather than panics or silent wraparound.

use super::TypeId;
use crate::error::DbError;
use eyre::Result;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL, tagged with its declared type.
    Null(TypeId),
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Decimal(f64),
    Varchar(String),
    Timestamp(u64),
    Vector(Vec<f64>),
}

impl Value {
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Null(ty) => *ty,
            Value::Boolean(_) => TypeId::Boolean,
            Value::TinyInt(_) => TypeId::TinyInt,
            Value::SmallInt(_) => TypeId::SmallInt,
            Value::Integer(_) => TypeId::Integer,
            Value::BigInt(_) => TypeId::BigInt,
            Value::Decimal(_) => TypeId::Decimal,
            Value::Varchar(_) => TypeId::Varchar,
            Value::Timestamp(_) => TypeId::Timestamp,
            Value::Vector(_) => TypeId::Vector,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// The boolean reading of this value for predicate evaluation. NULL and
    /// non-boolean values read as `None`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Decimal(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_vector(&self) -> Result<&[f64]> {
        match self {
            Value::Vector(v) => Ok(v),
            other => Err(DbError::Execution(format!(
                "expected VECTOR operand, got {}",
                other.type_id()
            ))
            .into()),
        }
    }

    /// Three-valued SQL comparison. `Ok(None)` is UNKNOWN (a NULL operand);
    /// incompatible tags are an error.
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>> {
        if self.is_null() || other.is_null() {
            return Ok(None);
        }
        let ord = match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Vector(a), Value::Vector(b)) => {
                if a.len() != b.len() {
                    return Err(DbError::Execution(format!(
                        "cannot compare vectors of dimension {} and {}",
                        a.len(),
                        b.len()
                    ))
                    .into());
                }
                a.iter()
                    .zip(b.iter())
                    .find_map(|(x, y)| {
                        let ord = x.partial_cmp(y).unwrap_or(Ordering::Equal);
                        (ord != Ordering::Equal).then_some(ord)
                    })
                    .unwrap_or(Ordering::Equal)
            }
            _ if self.type_id().is_numeric() && other.type_id().is_numeric() => {
                match (self.as_i64(), other.as_i64()) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    _ => {
                        let a = self.as_f64().unwrap();
                        let b = other.as_f64().unwrap();
                        a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                    }
                }
            }
            _ => {
                return Err(DbError::InvalidInput(format!(
                    "cannot compare {} with {}",
                    self.type_id(),
                    other.type_id()
                ))
                .into());
            }
        };
        Ok(Some(ord))
    }

    fn checked_int_op(op: char, a: i64, b: i64) -> Result<i64> {
        let out = match op {
            '+' => a.checked_add(b),
            '-' => a.checked_sub(b),
            '*' => a.checked_mul(b),
            '/' => {
                if b == 0 {
                    return Err(DbError::Execution("division by zero".into()).into());
                }
                a.checked_div(b)
            }
            '%' => {
                if b == 0 {
                    return Err(DbError::Execution("division by zero".into()).into());
                }
                a.checked_rem(b)
            }
            _ => unreachable!("unknown arithmetic op {op}"),
        };
        out.ok_or_else(|| DbError::Execution(format!("integer overflow in {a} {op} {b}")).into())
    }

    /// Numeric arithmetic with SQL NULL propagation. Integer operands stay
    /// integral (result widened to BIGINT); any DECIMAL operand promotes the
    /// result to DECIMAL.
    pub fn arithmetic(&self, other: &Value, op: char) -> Result<Value> {
        if !self.type_id().is_numeric() || !other.type_id().is_numeric() {
            return Err(DbError::InvalidInput(format!(
                "arithmetic requires numeric operands, got {} {op} {}",
                self.type_id(),
                other.type_id()
            ))
            .into());
        }
        if self.is_null() || other.is_null() {
            return Ok(Value::Null(TypeId::Decimal));
        }
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => Ok(Value::BigInt(Self::checked_int_op(op, a, b)?)),
            _ => {
                let a = self.as_f64().unwrap();
                let b = other.as_f64().unwrap();
                let out = match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' | '%' => {
                        if b == 0.0 {
                            return Err(DbError::Execution("division by zero".into()).into());
                        }
                        if op == '/' {
                            a / b
                        } else {
                            a % b
                        }
                    }
                    _ => unreachable!("unknown arithmetic op {op}"),
                };
                Ok(Value::Decimal(out))
            }
        }
    }

    /// Casts this value to the target tag, used when binding literals to
    /// column types. Only numeric narrowing/widening and NULL retagging are
    /// supported; everything else must already match.
    pub fn cast_to(&self, target: TypeId) -> Result<Value> {
        if self.type_id() == target {
            return Ok(self.clone());
        }
        if self.is_null() {
            return Ok(Value::Null(target));
        }
        let fail = || -> eyre::Report {
            DbError::InvalidInput(format!("cannot cast {} to {target}", self.type_id())).into()
        };
        match target {
            TypeId::TinyInt => {
                let v = self.as_i64().ok_or_else(&fail)?;
                i8::try_from(v).map(Value::TinyInt).map_err(|_| fail())
            }
            TypeId::SmallInt => {
                let v = self.as_i64().ok_or_else(&fail)?;
                i16::try_from(v).map(Value::SmallInt).map_err(|_| fail())
            }
            TypeId::Integer => {
                let v = self.as_i64().ok_or_else(&fail)?;
                i32::try_from(v).map(Value::Integer).map_err(|_| fail())
            }
            TypeId::BigInt => self.as_i64().map(Value::BigInt).ok_or_else(fail),
            TypeId::Decimal => self.as_f64().map(Value::Decimal).ok_or_else(fail),
            TypeId::Timestamp => match self.as_i64() {
                Some(v) if v >= 0 => Ok(Value::Timestamp(v as u64)),
                _ => Err(fail()),
            },
            _ => Err(fail()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null(_) => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::TinyInt(v) => write!(f, "{v}"),
            Value::SmallInt(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Varchar(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{v}"),
            Value::Vector(v) => {
                write!(f, "[")?;
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, "]")
            }
        }
    }
}
