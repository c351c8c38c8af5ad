//! # Type System
//!
//! The closed set of SQL types QuiverDB understands, plus the runtime value,
//! column and schema representations built on it.
//!
//! - [`TypeId`]: the type tag. Fixed-width types serialize inline; VARCHAR and
//!   VECTOR serialize as an inline offset plus a payload in the tuple tail.
//! - [`Value`]: a typed runtime cell with three-valued NULL semantics.
//! - [`Column`] / [`Schema`]: named, typed column layouts with precomputed
//!   inline offsets for tuple packing.

pub mod column;
pub mod schema;
pub mod value;

pub use column::Column;
pub use schema::Schema;
pub use value::Value;

use crate::error::DbError;
use eyre::Result;

/// SQL type tag. The discriminants are stable; they appear in EXPLAIN output
/// and the catalog, not on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeId {
    Invalid,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Varchar,
    Timestamp,
    Vector,
}

impl TypeId {
    /// Inline bytes this type occupies in a packed tuple. Variable-width
    /// types store a 2-byte offset to their payload in the tuple tail.
    pub fn inline_size(self) -> usize {
        match self {
            TypeId::Invalid => 0,
            TypeId::Boolean | TypeId::TinyInt => 1,
            TypeId::SmallInt => 2,
            TypeId::Integer => 4,
            TypeId::BigInt | TypeId::Decimal | TypeId::Timestamp => 8,
            TypeId::Varchar | TypeId::Vector => 2,
        }
    }

    pub fn is_variable(self) -> bool {
        matches!(self, TypeId::Varchar | TypeId::Vector)
    }

    /// True for the numeric family (cross-width comparison and arithmetic are
    /// permitted inside the family).
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeId::TinyInt | TypeId::SmallInt | TypeId::Integer | TypeId::BigInt | TypeId::Decimal
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeId::Invalid => "INVALID",
            TypeId::Boolean => "BOOLEAN",
            TypeId::TinyInt => "TINYINT",
            TypeId::SmallInt => "SMALLINT",
            TypeId::Integer => "INTEGER",
            TypeId::BigInt => "BIGINT",
            TypeId::Decimal => "DECIMAL",
            TypeId::Varchar => "VARCHAR",
            TypeId::Timestamp => "TIMESTAMP",
            TypeId::Vector => "VECTOR",
        }
    }

    /// Parses a SQL type name (without length suffix).
    pub fn parse(name: &str) -> Result<TypeId> {
        let ty = match name.to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => TypeId::Boolean,
            "TINYINT" => TypeId::TinyInt,
            "SMALLINT" => TypeId::SmallInt,
            "INTEGER" | "INT" => TypeId::Integer,
            "BIGINT" => TypeId::BigInt,
            "DECIMAL" | "DOUBLE" => TypeId::Decimal,
            "VARCHAR" => TypeId::Varchar,
            "TIMESTAMP" => TypeId::Timestamp,
            "VECTOR" => TypeId::Vector,
            other => return Err(DbError::InvalidInput(format!("unknown type: {other}")).into()),
        };
        Ok(ty)
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
