//! Scalar values, column types, and index keys.

use std::cmp::Ordering;
use std::fmt;

use crate::codec::{
    decode_short_bytes, encode_short_bytes, ByteDecode, ByteEncode,
};
use crate::config::{BIGINT_SIZE, BOOL_SIZE, FLOAT_SIZE, INT_SIZE, TIMESTAMP_SIZE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    BigInt,
    Float,
    Bool,
    Timestamp,
    Text,
}

impl DataType {
    /// Fixed on-disk width, or `None` for the variable-width TEXT type.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            DataType::Int => Some(INT_SIZE),
            DataType::BigInt => Some(BIGINT_SIZE),
            DataType::Float => Some(FLOAT_SIZE),
            DataType::Bool => Some(BOOL_SIZE),
            DataType::Timestamp => Some(TIMESTAMP_SIZE),
            DataType::Text => None,
        }
    }

    fn tag(self) -> u8 {
        match self {
            DataType::Int => 0,
            DataType::BigInt => 1,
            DataType::Float => 2,
            DataType::Bool => 3,
            DataType::Timestamp => 4,
            DataType::Text => 5,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => DataType::Int,
            1 => DataType::BigInt,
            2 => DataType::Float,
            3 => DataType::Bool,
            4 => DataType::Timestamp,
            5 => DataType::Text,
            other => return Err(Error::format(format!("unknown data type tag: {other}"))),
        })
    }
}

impl ByteEncode for DataType {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
    }
}

impl ByteDecode for DataType {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let tag = u8::decode(input)?;
        DataType::from_tag(tag)
    }
}

/// A typed column value. `Value::Null` stands in for SQL NULL in every
/// context (tuple storage, expression evaluation, index keys).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    BigInt(i64),
    Float(f64),
    Bool(bool),
    Timestamp(i64),
    Text(String),
    Null,
}

impl Value {
    pub fn datatype(&self) -> Option<DataType> {
        match self {
            Value::Int(_) => Some(DataType::Int),
            Value::BigInt(_) => Some(DataType::BigInt),
            Value::Float(_) => Some(DataType::Float),
            Value::Bool(_) => Some(DataType::Bool),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Text(_) => Some(DataType::Text),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truncate TEXT values to the configured number of leading Unicode
    /// code points. Non-text values pass through unchanged.
    pub fn truncate_text(&self, max_code_points: usize) -> Value {
        match self {
            Value::Text(s) => {
                Value::Text(s.chars().take(max_code_points).collect())
            }
            other => other.clone(),
        }
    }

    /// Partial ordering that treats NULL as incomparable: not equal to
    /// anything, not ordered against anything.
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::BigInt(b)) => (*a as i64).partial_cmp(b),
            (Value::BigInt(a), Value::Int(b)) => a.partial_cmp(&(*b as i64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.chars().partial_cmp(b.chars()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Null => write!(f, "NULL"),
        }
    }
}

/// A truncated, comparable index key: one value per key column.
#[derive(Debug, Clone, PartialEq)]
pub struct Key(pub Vec<Value>);

impl Key {
    pub fn single(value: Value) -> Self {
        Key(vec![value])
    }

    pub fn normalize(&self, text_truncation_len: usize) -> Key {
        Key(
            self.0
                .iter()
                .map(|v| v.truncate_text(text_truncation_len))
                .collect(),
        )
    }

    /// Lexicographic comparison across components. A key containing NULL
    /// components is never equal/ordered against another key at that
    /// component; callers that need total ordering for storage (B-tree
    /// key order) must not insert NULL key components (enforced upstream
    /// by NOT NULL-on-primary-key / index-column constraints).
    pub fn compare(&self, other: &Key) -> Option<Ordering> {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.partial_compare(b) {
                Some(Ordering::Equal) => continue,
                other_ord => return other_ord,
            }
        }
        Some(self.0.len().cmp(&other.0.len()))
    }
}

impl ByteEncode for Key {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.0.len() as u16).encode(out);
        for v in &self.0 {
            encode_value(v, out);
        }
    }
}

impl ByteDecode for Key {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let n = u16::decode(input)? as usize;
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(decode_value(input)?);
        }
        Ok(Key(values))
    }
}

/// Tagged value encoding: 1-byte tag (0xFF = NULL, else `DataType::tag`)
/// followed by the fixed- or variable-width payload. Used for B-tree keys
/// and anywhere a heterogeneous `Value` crosses a binary boundary outside
/// of a schema-bound tuple body.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(0xFF),
        Value::Int(v) => {
            out.push(DataType::Int.tag());
            v.encode(out);
        }
        Value::BigInt(v) => {
            out.push(DataType::BigInt.tag());
            v.encode(out);
        }
        Value::Float(v) => {
            out.push(DataType::Float.tag());
            v.encode(out);
        }
        Value::Bool(v) => {
            out.push(DataType::Bool.tag());
            v.encode(out);
        }
        Value::Timestamp(v) => {
            out.push(DataType::Timestamp.tag());
            v.encode(out);
        }
        Value::Text(s) => {
            out.push(DataType::Text.tag());
            encode_short_bytes(s.as_bytes(), out);
        }
    }
}

pub fn decode_value(input: &mut &[u8]) -> Result<Value> {
    let tag = u8::decode(input)?;
    if tag == 0xFF {
        return Ok(Value::Null);
    }
    Ok(match DataType::from_tag(tag)? {
        DataType::Int => Value::Int(i32::decode(input)?),
        DataType::BigInt => Value::BigInt(i64::decode(input)?),
        DataType::Float => Value::Float(f64::decode(input)?),
        DataType::Bool => Value::Bool(bool::decode(input)?),
        DataType::Timestamp => Value::Timestamp(i64::decode(input)?),
        DataType::Text => {
            let bytes = decode_short_bytes(input)?;
            Value::Text(String::from_utf8(bytes).map_err(|e| Error::format(e.to_string()))?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_truncation_is_by_code_point() {
        let v = Value::Text("abcdefghij1".to_string());
        let t = v.truncate_text(10);
        assert_eq!(t, Value::Text("abcdefghij".to_string()));
    }

    #[test]
    fn truncated_text_keys_collide() {
        let a = Value::Text("abcdefghij1".to_string()).truncate_text(10);
        let b = Value::Text("abcdefghij2".to_string()).truncate_text(10);
        assert_eq!(a, b);
    }

    #[test]
    fn null_is_unordered() {
        assert_eq!(Value::Null.partial_compare(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).partial_compare(&Value::Null), None);
    }

    #[test]
    fn value_roundtrips() {
        for v in [
            Value::Int(-7),
            Value::BigInt(9_000_000_000),
            Value::Float(3.5),
            Value::Bool(true),
            Value::Timestamp(42),
            Value::Text("hello".to_string()),
            Value::Null,
        ] {
            let mut buf = Vec::new();
            encode_value(&v, &mut buf);
            let mut slice = buf.as_slice();
            let decoded = decode_value(&mut slice).unwrap();
            assert_eq!(v, decoded);
            assert!(slice.is_empty());
        }
    }
}
