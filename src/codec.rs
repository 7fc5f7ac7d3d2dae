//! Explicit binary (de)serialization: fixed-width counts, length-prefixed
//! strings, explicit per-value type tags. Used by the catalog, tuples, and
//! B-tree nodes alike, in place of any language-native serialization
//! format.

use std::convert::TryInto;
use std::mem::size_of;

use crate::error::{Error, Result};

pub trait ByteEncode {
    fn encode(&self, out: &mut Vec<u8>);
}

pub trait ByteDecode: Sized {
    fn decode(input: &mut &[u8]) -> Result<Self>;
}

pub fn take_vec(input: &mut &[u8], n: usize) -> Result<Vec<u8>> {
    Ok(take(input, n)?.to_vec())
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if input.len() < n {
        return Err(Error::format(format!(
            "unexpected end of buffer: wanted {n} bytes, had {}",
            input.len()
        )));
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

macro_rules! impl_int_codec {
    ($($t:ty),+) => {
        $(
            impl ByteEncode for $t {
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }

            impl ByteDecode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self> {
                    let bytes = take(input, size_of::<$t>())?;
                    Ok(<$t>::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )+
    };
}

impl_int_codec!(u8, u16, u32, u64, i8, i16, i32, i64, f64);

impl ByteEncode for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(if *self { 1 } else { 0 });
    }
}

impl ByteDecode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(u8::decode(input)? != 0)
    }
}

/// 2-byte length prefix followed by raw bytes. Used for TEXT values and
/// anything else capped well under 64 KiB.
pub fn encode_short_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    (bytes.len() as u16).encode(out);
    out.extend_from_slice(bytes);
}

pub fn decode_short_bytes(input: &mut &[u8]) -> Result<Vec<u8>> {
    let len = u16::decode(input)? as usize;
    Ok(take(input, len)?.to_vec())
}

pub fn encode_string(s: &str, out: &mut Vec<u8>) {
    encode_short_bytes(s.as_bytes(), out);
}

pub fn decode_string(input: &mut &[u8]) -> Result<String> {
    let bytes = decode_short_bytes(input)?;
    String::from_utf8(bytes).map_err(|e| Error::format(format!("invalid utf-8: {e}")))
}

/// 4-byte length-prefixed byte blob. Used for the catalog payload and the
/// keys/values regions of a B-tree node.
pub fn encode_long_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    (bytes.len() as u32).encode(out);
    out.extend_from_slice(bytes);
}

pub fn decode_long_bytes(input: &mut &[u8]) -> Result<Vec<u8>> {
    let len = u32::decode(input)? as usize;
    Ok(take(input, len)?.to_vec())
}
