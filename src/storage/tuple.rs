//! # Packed Tuple Codec
//!
//! A `Tuple` is an immutable packed row: one inline cell per column followed
//! by a tail of variable-width payloads.
//!
//! ## Layout
//!
//! ```text
//! +-------------------------------+----------------------------+
//! | inline region                 | tail                       |
//! |  fixed cols: value bytes (LE) |  per varlen col:           |
//! |  varlen cols: u16 offset ─────┼─> [len:u16][payload bytes] |
//! +-------------------------------+----------------------------+
//! ```
//!
//! Offsets are relative to the tuple start, so a tuple is relocatable without
//! fixups. NULL encodings are per-type sentinels:
//!
//! | Type | NULL sentinel |
//! |------|---------------|
//! | BOOLEAN | 0xFF |
//! | TINYINT/SMALLINT/INTEGER/BIGINT | type MIN |
//! | DECIMAL | a reserved quiet-NaN bit pattern |
//! | TIMESTAMP | u64::MAX |
//! | VARCHAR/VECTOR | offset 0xFFFF |
//!
//! Invariant: serialize → deserialize under the same schema reproduces the
//! values exactly, and a freshly serialized tuple round-trips byte-for-byte
//! through the table heap.

use crate::error::DbError;
use crate::types::{Schema, TypeId, Value};
use eyre::{ensure, Result};

/// Physical tuple address: (page id, slot index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: u32,
    pub slot: u16,
}

impl Rid {
    pub const INVALID: Rid = Rid { page_id: u32::MAX, slot: u16::MAX };

    pub fn new(page_id: u32, slot: u16) -> Self {
        Self { page_id, slot }
    }

    pub fn is_valid(&self) -> bool {
        *self != Rid::INVALID
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.page_id, self.slot)
    }
}

/// Reserved quiet-NaN used as the DECIMAL NULL sentinel. Real query results
/// cannot produce this exact payload.
const DECIMAL_NULL_BITS: u64 = 0x7FF8_0000_0000_0001;
/// Tail-offset sentinel for NULL variable-width cells.
const VARLEN_NULL_OFFSET: u16 = u16::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    data: Vec<u8>,
    rid: Option<Rid>,
}

impl Tuple {
    /// An empty tuple (zero columns); used as the payload of "prior was
    /// absent" undo entries.
    pub fn empty() -> Self {
        Self { data: Vec::new(), rid: None }
    }

    /// Packs `values` under `schema`. Value tags must already match the
    /// column tags (the binder casts literals); a mismatch here is an
    /// execution error.
    pub fn from_values(values: &[Value], schema: &Schema) -> Result<Tuple> {
        ensure!(
            values.len() == schema.len(),
            DbError::Execution(format!(
                "tuple arity {} does not match schema arity {}",
                values.len(),
                schema.len()
            ))
        );

        let mut data = vec![0u8; schema.inline_size()];
        for (idx, value) in values.iter().enumerate() {
            let col = schema.column(idx);
            ensure!(
                value.type_id() == col.type_id(),
                DbError::Execution(format!(
                    "column '{}' expects {}, got {}",
                    col.name(),
                    col.type_id(),
                    value.type_id()
                ))
            );
            let at = schema.offset(idx);
            match value {
                Value::Null(ty) => write_null(&mut data, at, *ty),
                Value::Boolean(v) => data[at] = *v as u8,
                Value::TinyInt(v) => data[at] = *v as u8,
                Value::SmallInt(v) => data[at..at + 2].copy_from_slice(&v.to_le_bytes()),
                Value::Integer(v) => data[at..at + 4].copy_from_slice(&v.to_le_bytes()),
                Value::BigInt(v) => data[at..at + 8].copy_from_slice(&v.to_le_bytes()),
                Value::Decimal(v) => data[at..at + 8].copy_from_slice(&v.to_bits().to_le_bytes()),
                Value::Timestamp(v) => data[at..at + 8].copy_from_slice(&v.to_le_bytes()),
                Value::Varchar(s) => {
                    let bytes = s.as_bytes();
                    ensure!(
                        bytes.len() <= u16::MAX as usize - 1,
                        DbError::Execution(format!("varchar payload too large: {}", bytes.len()))
                    );
                    let off = append_payload(&mut data, bytes)?;
                    data[at..at + 2].copy_from_slice(&off.to_le_bytes());
                }
                Value::Vector(v) => {
                    ensure!(
                        col.length() as usize == v.len(),
                        DbError::Execution(format!(
                            "column '{}' expects VECTOR({}), got dimension {}",
                            col.name(),
                            col.length(),
                            v.len()
                        ))
                    );
                    let mut payload = Vec::with_capacity(v.len() * 8);
                    for x in v {
                        payload.extend_from_slice(&x.to_le_bytes());
                    }
                    let off = append_payload(&mut data, &payload)?;
                    data[at..at + 2].copy_from_slice(&off.to_le_bytes());
                }
            }
        }
        Ok(Tuple { data, rid: None })
    }

    pub fn from_bytes(data: Vec<u8>) -> Tuple {
        Tuple { data, rid: None }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn rid(&self) -> Option<Rid> {
        self.rid
    }

    pub fn set_rid(&mut self, rid: Rid) {
        self.rid = Some(rid);
    }

    /// Deserializes column `idx` under `schema`.
    pub fn value(&self, schema: &Schema, idx: usize) -> Result<Value> {
        let col = schema.column(idx);
        let at = schema.offset(idx);
        let ty = col.type_id();
        ensure!(
            at + ty.inline_size() <= self.data.len(),
            DbError::Execution(format!(
                "tuple too short for column '{}' at offset {at}",
                col.name()
            ))
        );
        let value = match ty {
            TypeId::Boolean => match self.data[at] {
                0xFF => Value::Null(ty),
                b => Value::Boolean(b != 0),
            },
            TypeId::TinyInt => {
                let v = self.data[at] as i8;
                if v == i8::MIN {
                    Value::Null(ty)
                } else {
                    Value::TinyInt(v)
                }
            }
            TypeId::SmallInt => {
                let v = i16::from_le_bytes(self.fixed::<2>(at));
                if v == i16::MIN {
                    Value::Null(ty)
                } else {
                    Value::SmallInt(v)
                }
            }
            TypeId::Integer => {
                let v = i32::from_le_bytes(self.fixed::<4>(at));
                if v == i32::MIN {
                    Value::Null(ty)
                } else {
                    Value::Integer(v)
                }
            }
            TypeId::BigInt => {
                let v = i64::from_le_bytes(self.fixed::<8>(at));
                if v == i64::MIN {
                    Value::Null(ty)
                } else {
                    Value::BigInt(v)
                }
            }
            TypeId::Decimal => {
                let bits = u64::from_le_bytes(self.fixed::<8>(at));
                if bits == DECIMAL_NULL_BITS {
                    Value::Null(ty)
                } else {
                    Value::Decimal(f64::from_bits(bits))
                }
            }
            TypeId::Timestamp => {
                let v = u64::from_le_bytes(self.fixed::<8>(at));
                if v == u64::MAX {
                    Value::Null(ty)
                } else {
                    Value::Timestamp(v)
                }
            }
            TypeId::Varchar => {
                let off = u16::from_le_bytes(self.fixed::<2>(at));
                if off == VARLEN_NULL_OFFSET {
                    Value::Null(ty)
                } else {
                    let bytes = self.payload(off as usize)?;
                    let s = std::str::from_utf8(bytes).map_err(|_| {
                        DbError::Execution(format!("column '{}' holds invalid utf-8", col.name()))
                    })?;
                    Value::Varchar(s.to_string())
                }
            }
            TypeId::Vector => {
                let off = u16::from_le_bytes(self.fixed::<2>(at));
                if off == VARLEN_NULL_OFFSET {
                    Value::Null(ty)
                } else {
                    let bytes = self.payload(off as usize)?;
                    ensure!(
                        bytes.len() % 8 == 0,
                        DbError::Execution("vector payload is not a multiple of 8 bytes".into())
                    );
                    let v = bytes
                        .chunks_exact(8)
                        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
                        .collect();
                    Value::Vector(v)
                }
            }
            // An INVALID column occupies no bytes and is always NULL; it
            // only arises from untyped NULL literals in projections.
            TypeId::Invalid => Value::Null(TypeId::Invalid),
        };
        Ok(value)
    }

    /// Deserializes every column.
    pub fn values(&self, schema: &Schema) -> Result<Vec<Value>> {
        (0..schema.len()).map(|i| self.value(schema, i)).collect()
    }

    fn fixed<const N: usize>(&self, at: usize) -> [u8; N] {
        self.data[at..at + N].try_into().unwrap()
    }

    fn payload(&self, off: usize) -> Result<&[u8]> {
        ensure!(
            off + 2 <= self.data.len(),
            DbError::Execution(format!("varlen offset {off} out of bounds"))
        );
        let len = u16::from_le_bytes(self.data[off..off + 2].try_into().unwrap()) as usize;
        ensure!(
            off + 2 + len <= self.data.len(),
            DbError::Execution(format!("varlen payload at {off} overruns tuple"))
        );
        Ok(&self.data[off + 2..off + 2 + len])
    }
}

fn write_null(data: &mut [u8], at: usize, ty: TypeId) {
    match ty {
        TypeId::Boolean => data[at] = 0xFF,
        TypeId::TinyInt => data[at] = i8::MIN as u8,
        TypeId::SmallInt => data[at..at + 2].copy_from_slice(&i16::MIN.to_le_bytes()),
        TypeId::Integer => data[at..at + 4].copy_from_slice(&i32::MIN.to_le_bytes()),
        TypeId::BigInt => data[at..at + 8].copy_from_slice(&i64::MIN.to_le_bytes()),
        TypeId::Decimal => data[at..at + 8].copy_from_slice(&DECIMAL_NULL_BITS.to_le_bytes()),
        TypeId::Timestamp => data[at..at + 8].copy_from_slice(&u64::MAX.to_le_bytes()),
        TypeId::Varchar | TypeId::Vector => {
            data[at..at + 2].copy_from_slice(&VARLEN_NULL_OFFSET.to_le_bytes());
        }
        TypeId::Invalid => {}
    }
}

fn append_payload(data: &mut Vec<u8>, payload: &[u8]) -> Result<u16> {
    let off = data.len();
    ensure!(
        off + 2 + payload.len() < VARLEN_NULL_OFFSET as usize,
        DbError::Execution(format!("tuple exceeds maximum encodable size at {off}"))
    );
    data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    data.extend_from_slice(payload);
    Ok(off as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Column;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("a", TypeId::Integer),
            Column::new_varchar("s", 16),
            Column::new("d", TypeId::Decimal),
            Column::new_vector("v", 3),
        ])
    }

    fn row() -> Vec<Value> {
        vec![
            Value::Integer(42),
            Value::Varchar("hello".into()),
            Value::Decimal(2.5),
            Value::Vector(vec![1.0, -2.0, 0.5]),
        ]
    }

    #[test]
    fn round_trip_preserves_values() {
        let schema = schema();
        let tuple = Tuple::from_values(&row(), &schema).unwrap();
        assert_eq!(tuple.values(&schema).unwrap(), row());
    }

    #[test]
    fn round_trip_preserves_bytes() {
        let schema = schema();
        let tuple = Tuple::from_values(&row(), &schema).unwrap();
        let copy = Tuple::from_bytes(tuple.data().to_vec());
        assert_eq!(copy.data(), tuple.data());
        assert_eq!(copy.values(&schema).unwrap(), row());
    }

    #[test]
    fn nulls_round_trip_for_every_type() {
        let schema = schema();
        let nulls = vec![
            Value::Null(TypeId::Integer),
            Value::Null(TypeId::Varchar),
            Value::Null(TypeId::Decimal),
            Value::Null(TypeId::Vector),
        ];
        let tuple = Tuple::from_values(&nulls, &schema).unwrap();
        assert_eq!(tuple.values(&schema).unwrap(), nulls);
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let schema = schema();
        assert!(Tuple::from_values(&[Value::Integer(1)], &schema).is_err());
    }

    #[test]
    fn wrong_vector_dimension_is_rejected() {
        let schema = schema();
        let mut values = row();
        values[3] = Value::Vector(vec![1.0]);
        assert!(Tuple::from_values(&values, &schema).is_err());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let schema = schema();
        let mut values = row();
        values[0] = Value::Varchar("oops".into());
        assert!(Tuple::from_values(&values, &schema).is_err());
    }

    #[test]
    fn rid_display_and_validity() {
        let rid = Rid::new(2, 5);
        assert_eq!(rid.to_string(), "2/5");
        assert!(rid.is_valid());
        assert!(!Rid::INVALID.is_valid());
    }
}
