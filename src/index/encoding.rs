//! # Memcomparable Key Encoding
//!
//! Byte-comparable encoding of key tuples: encoded keys preserve sort order
//! under plain lexicographic comparison, so every index structure compares
//! with a single `memcmp` and no type dispatch.
//!
//! ## Type Prefix Scheme
//!
//! Each encoded cell starts with a prefix byte fixing the order between
//! NULLs and value classes:
//!
//! ```text
//! 0x01  NULL
//! 0x02  FALSE        0x03  TRUE
//! 0x12  NEG_INT      0x14  ZERO       0x16  POS_INT
//! 0x18  FLOAT
//! 0x20  TEXT
//! 0x30  TIMESTAMP
//! 0x70  VECTOR
//! ```
//!
//! ## Number Encoding
//!
//! Integers sign-split: negatives under their own prefix as two's-complement
//! big-endian (which orders correctly among negatives), zero is a bare
//! prefix, positives as big-endian magnitude. Floats use the IEEE 754 bit
//! trick — invert all bits of negatives, flip the sign bit of positives —
//! which totally orders every finite value.
//!
//! ## Text Encoding
//!
//! Embedded NULs are escaped (`0x00 -> 0x00 0xFF`) and cells terminate with
//! `0x00 0x00`, so no string is a prefix of another and order is preserved.

use crate::types::Value;

mod prefix {
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;
    pub const NEG_INT: u8 = 0x12;
    pub const ZERO: u8 = 0x14;
    pub const POS_INT: u8 = 0x16;
    pub const FLOAT: u8 = 0x18;
    pub const TEXT: u8 = 0x20;
    pub const TIMESTAMP: u8 = 0x30;
    pub const VECTOR: u8 = 0x70;
}

/// Encodes a composite key; cell encodings are simply concatenated (each is
/// self-terminating).
pub fn encode_key(values: &[Value]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 10);
    for value in values {
        encode_value(value, &mut buf);
    }
    buf
}

pub fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null(_) => buf.push(prefix::NULL),
        Value::Boolean(false) => buf.push(prefix::FALSE),
        Value::Boolean(true) => buf.push(prefix::TRUE),
        Value::TinyInt(v) => encode_int(*v as i64, buf),
        Value::SmallInt(v) => encode_int(*v as i64, buf),
        Value::Integer(v) => encode_int(*v as i64, buf),
        Value::BigInt(v) => encode_int(*v, buf),
        Value::Decimal(v) => {
            buf.push(prefix::FLOAT);
            buf.extend_from_slice(&ordered_float_bits(*v).to_be_bytes());
        }
        Value::Varchar(s) => encode_text(s.as_bytes(), buf),
        Value::Timestamp(v) => {
            buf.push(prefix::TIMESTAMP);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Value::Vector(v) => {
            buf.push(prefix::VECTOR);
            buf.extend_from_slice(&(v.len() as u16).to_be_bytes());
            for x in v {
                buf.extend_from_slice(&ordered_float_bits(*x).to_be_bytes());
            }
        }
    }
}

fn encode_int(v: i64, buf: &mut Vec<u8>) {
    match v {
        0 => buf.push(prefix::ZERO),
        v if v > 0 => {
            buf.push(prefix::POS_INT);
            buf.extend_from_slice(&(v as u64).to_be_bytes());
        }
        v => {
            buf.push(prefix::NEG_INT);
            // Two's-complement big-endian orders negatives correctly among
            // themselves.
            buf.extend_from_slice(&(v as u64).to_be_bytes());
        }
    }
}

fn encode_text(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.push(prefix::TEXT);
    for &b in bytes {
        if b == 0x00 {
            buf.extend_from_slice(&[0x00, 0xFF]);
        } else {
            buf.push(b);
        }
    }
    buf.extend_from_slice(&[0x00, 0x00]);
}

fn ordered_float_bits(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits ^ (1 << 63)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeId;

    fn key(v: Value) -> Vec<u8> {
        encode_key(std::slice::from_ref(&v))
    }

    #[test]
    fn integer_order_is_preserved() {
        let values = [-1000i64, -5, -1, 0, 1, 5, 1000, i64::MAX];
        let keys: Vec<_> = values.iter().map(|&v| key(Value::BigInt(v))).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn float_order_is_preserved() {
        let values = [-1e9, -2.5, -0.0, 0.0, 0.25, 7.0, 1e12];
        let keys: Vec<_> = values.iter().map(|&v| key(Value::Decimal(v))).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn text_order_and_null_escaping() {
        assert!(key(Value::Varchar("abc".into())) < key(Value::Varchar("abd".into())));
        assert!(key(Value::Varchar("ab".into())) < key(Value::Varchar("abc".into())));
        assert!(key(Value::Varchar("ab".into())) < key(Value::Varchar("ab\0c".into())));
    }

    #[test]
    fn null_sorts_before_everything() {
        assert!(key(Value::Null(TypeId::Integer)) < key(Value::BigInt(i64::MIN + 1)));
        assert!(key(Value::Null(TypeId::Varchar)) < key(Value::Varchar(String::new())));
    }

    #[test]
    fn composite_keys_compare_columnwise() {
        let a = encode_key(&[Value::Integer(1), Value::Varchar("z".into())]);
        let b = encode_key(&[Value::Integer(2), Value::Varchar("a".into())]);
        assert!(a < b);
        let c = encode_key(&[Value::Integer(1), Value::Varchar("a".into())]);
        assert!(c < a);
    }

    #[test]
    fn equal_values_encode_identically() {
        assert_eq!(key(Value::Integer(7)), key(Value::Integer(7)));
        assert_eq!(
            encode_key(&[Value::Boolean(true), Value::Timestamp(9)]),
            encode_key(&[Value::Boolean(true), Value::Timestamp(9)]),
        );
    }
}
