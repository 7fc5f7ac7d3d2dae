//! Row (de)serialization against a `TableSchema`: a column count, then a
//! null bitmap, then each column's fixed-width value or length-prefixed
//! TEXT bytes. The leading column count lets a row written before a later
//! `ADD COLUMN` still decode, with the columns it predates read as NULL.

use bit_vec::BitVec;

use crate::catalog::TableSchema;
use crate::codec::{decode_short_bytes, encode_short_bytes, ByteDecode, ByteEncode};
use crate::error::{Error, Result};
use crate::value::{DataType, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Tuple { values }
    }

    pub fn serialize(&self, schema: &TableSchema, max_tuple_size: usize, max_text_size: usize) -> Result<Vec<u8>> {
        if self.values.len() != schema.columns.len() {
            return Err(Error::schema(format!(
                "value count {} does not match column count {} for table '{}'",
                self.values.len(),
                schema.columns.len(),
                schema.table_name
            )));
        }

        let mut out = Vec::new();

        // Column count leads every tuple so a row serialized before a later
        // `ADD COLUMN` still decodes: columns beyond the stored count are
        // trailing columns the row predates, and decode as NULL for them
        // (ADD COLUMN only ever appends a nullable column).
        (self.values.len() as u16).encode(&mut out);

        if schema.has_nullable_columns() {
            let nullable_count = schema.columns.iter().filter(|c| c.nullable).count();
            let mut bits = BitVec::from_elem(nullable_count, false);
            let mut bit_index = 0;
            for (col, value) in schema.columns.iter().zip(self.values.iter()) {
                if col.nullable {
                    if value.is_null() {
                        bits.set(bit_index, true);
                    }
                    bit_index += 1;
                }
            }
            // Packed LSB-first, padded to whole bytes.
            out.extend(pack_lsb_first(&bits));
        }

        for (col, value) in schema.columns.iter().zip(self.values.iter()) {
            if value.is_null() {
                if !col.nullable {
                    return Err(Error::constraint(format!("column '{}' cannot be NULL", col.name)));
                }
                continue;
            }

            match (col.datatype, value) {
                (DataType::Int, Value::Int(v)) => v.encode(&mut out),
                (DataType::BigInt, Value::BigInt(v)) => v.encode(&mut out),
                (DataType::Float, Value::Float(v)) => v.encode(&mut out),
                (DataType::Bool, Value::Bool(v)) => v.encode(&mut out),
                (DataType::Timestamp, Value::Timestamp(v)) => v.encode(&mut out),
                (DataType::Text, Value::Text(s)) => {
                    let mut bytes = s.as_bytes().to_vec();
                    if bytes.len() > max_text_size {
                        bytes.truncate(max_text_size);
                    }
                    encode_short_bytes(&bytes, &mut out);
                }
                _ => {
                    return Err(Error::schema(format!(
                        "column '{}' expects {:?}, got value of a different type",
                        col.name, col.datatype
                    )))
                }
            }
        }

        if out.len() > max_tuple_size {
            return Err(Error::constraint(format!(
                "tuple size ({} bytes) exceeds maximum ({} bytes)",
                out.len(),
                max_tuple_size
            )));
        }

        Ok(out)
    }

    pub fn deserialize(data: &[u8], schema: &TableSchema) -> Result<Tuple> {
        let mut input = data;

        let stored_count = u16::decode(&mut input)? as usize;
        if stored_count > schema.columns.len() {
            return Err(Error::format(format!(
                "tuple for table '{}' was serialized with {stored_count} columns, schema now has {}",
                schema.table_name,
                schema.columns.len()
            )));
        }
        let stored_columns = &schema.columns[..stored_count];

        let nullable_count = stored_columns.iter().filter(|c| c.nullable).count();
        let null_bits = if nullable_count > 0 {
            let byte_len = (nullable_count + 7) / 8;
            let raw = crate::codec::take_vec(&mut input, byte_len)?;
            Some(unpack_lsb_first(&raw, nullable_count))
        } else {
            None
        };

        let mut values = Vec::with_capacity(schema.columns.len());
        let mut nullable_index = 0usize;

        for col in stored_columns {
            let is_null = if col.nullable {
                let b = null_bits.as_ref().unwrap()[nullable_index];
                nullable_index += 1;
                b
            } else {
                false
            };

            if is_null {
                values.push(Value::Null);
                continue;
            }

            let value = match col.datatype {
                DataType::Int => Value::Int(i32::decode(&mut input)?),
                DataType::BigInt => Value::BigInt(i64::decode(&mut input)?),
                DataType::Float => Value::Float(f64::decode(&mut input)?),
                DataType::Bool => Value::Bool(bool::decode(&mut input)?),
                DataType::Timestamp => Value::Timestamp(i64::decode(&mut input)?),
                DataType::Text => {
                    let bytes = decode_short_bytes(&mut input)?;
                    Value::Text(String::from_utf8(bytes).map_err(|e| Error::format(e.to_string()))?)
                }
            };
            values.push(value);
        }

        // Columns added since this row was written are trailing and decode
        // as NULL; `AddColumn` only ever appends a nullable column.
        for col in &schema.columns[stored_count..] {
            if !col.nullable {
                return Err(Error::format(format!(
                    "column '{}' is missing from a pre-existing row and is not nullable",
                    col.name
                )));
            }
            values.push(Value::Null);
        }

        Ok(Tuple { values })
    }
}

fn pack_lsb_first(bits: &BitVec) -> Vec<u8> {
    let mut bytes = vec![0u8; (bits.len() + 7) / 8];
    for (i, bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn unpack_lsb_first(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| (bytes[i / 8] >> (i % 8)) & 1 == 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnDef::new("id", DataType::Int, false, false),
                ColumnDef::new("name", DataType::Text, true, false),
                ColumnDef::new("score", DataType::Float, true, false),
            ],
            vec!["id".to_string()],
        )
    }

    #[test]
    fn roundtrip_with_nulls() {
        let schema = schema();
        let t = Tuple::new(vec![Value::Int(7), Value::Null, Value::Float(1.5)]);
        let bytes = t.serialize(&schema, 65535, 10 * 1024).unwrap();
        let back = Tuple::deserialize(&bytes, &schema).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn roundtrip_without_nulls() {
        let schema = schema();
        let t = Tuple::new(vec![
            Value::Int(1),
            Value::Text("hello".into()),
            Value::Float(2.0),
        ]);
        let bytes = t.serialize(&schema, 65535, 10 * 1024).unwrap();
        let back = Tuple::deserialize(&bytes, &schema).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn row_serialized_under_a_narrower_schema_decodes_new_columns_as_null() {
        let narrow = TableSchema::new(
            "t",
            vec![ColumnDef::new("id", DataType::Int, false, false)],
            vec!["id".to_string()],
        );
        let bytes = Tuple::new(vec![Value::Int(1)]).serialize(&narrow, 65535, 10 * 1024).unwrap();

        let wide = schema();
        let decoded = Tuple::deserialize(&bytes, &wide).unwrap();
        assert_eq!(decoded.values, vec![Value::Int(1), Value::Null, Value::Null]);
    }

    #[test]
    fn oversized_tuple_rejected() {
        let schema = schema();
        let t = Tuple::new(vec![
            Value::Int(1),
            Value::Text("x".repeat(20_000)),
            Value::Float(1.0),
        ]);
        let err = t.serialize(&schema, 64 * 1024 - 1, 10 * 1024);
        assert!(err.is_err());
    }

    #[test]
    fn not_null_violation_rejected() {
        let schema = schema();
        let t = Tuple::new(vec![Value::Null, Value::Null, Value::Null]);
        assert!(t.serialize(&schema, 65535, 10 * 1024).is_err());
    }
}
