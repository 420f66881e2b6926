//! HTSMSG binary encoding for HTSP message bodies.
//!
//! A body is a flat sequence of fields:
//!
//! ```text
//! type:u8 | name_len:u8 | data_len:u32be | name[name_len] | data[data_len]
//! ```
//!
//! - `S64` data is little-endian using the fewest bytes (zero is empty)
//! - `MAP` and `LIST` data is itself a sequence of fields
//! - list elements carry empty names
//!
//! On the socket every body is preceded by its length as a big-endian u32.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::value::{FieldMap, Value};

/// HTSMSG field type tags.
pub mod field_type {
    pub const MAP: u8 = 1;
    pub const S64: u8 = 2;
    pub const STR: u8 = 3;
    pub const BIN: u8 = 4;
    pub const LIST: u8 = 5;
}

/// Size of the length prefix in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Size of the fixed part of a field header.
const FIELD_HEADER_LEN: usize = 6;

/// Deepest MAP/LIST nesting accepted in either direction.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Encoder/decoder for message bodies.
///
/// Implementations must satisfy `decode(encode(m)) == m` for every
/// representable `m`.
pub trait FieldCodec: Send + Sync {
    /// Encode a field map into a body (no length prefix).
    fn encode(&self, map: &FieldMap) -> Result<Vec<u8>, CodecError>;

    /// Decode a body (no length prefix) into a field map.
    fn decode(&self, body: &[u8]) -> Result<FieldMap, CodecError>;

    /// Encode a field map into a complete length-prefixed frame.
    fn encode_frame(&self, map: &FieldMap) -> Result<Bytes, CodecError> {
        let body = self.encode(map)?;
        let len = u32::try_from(body.len()).map_err(|_| CodecError::DataTooLong(String::new()))?;
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.put_u32(len);
        frame.extend_from_slice(&body);
        Ok(frame.freeze())
    }
}

/// The HTSMSG codec spoken by Tvheadend.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtsmsgCodec;

impl FieldCodec for HtsmsgCodec {
    fn encode(&self, map: &FieldMap) -> Result<Vec<u8>, CodecError> {
        encode_body(map)
    }

    fn decode(&self, body: &[u8]) -> Result<FieldMap, CodecError> {
        decode_body(body)
    }
}

/// Encode a field map to HTSMSG body bytes.
pub fn encode_body(map: &FieldMap) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    encode_map_fields(&mut buf, map, 0)?;
    Ok(buf)
}

/// Decode HTSMSG body bytes into a field map.
pub fn decode_body(body: &[u8]) -> Result<FieldMap, CodecError> {
    let fields = decode_fields(body, 0, 0)?;
    Ok(fields.into_iter().collect())
}

fn encode_map_fields(buf: &mut Vec<u8>, map: &FieldMap, depth: usize) -> Result<(), CodecError> {
    for (name, value) in map.iter() {
        encode_field(buf, name, value, depth)?;
    }
    Ok(())
}

/// Encode one field, back-patching the data length once the data is written.
fn encode_field(buf: &mut Vec<u8>, name: &str, value: &Value, depth: usize) -> Result<(), CodecError> {
    let name_len = u8::try_from(name.len()).map_err(|_| CodecError::NameTooLong(name.into()))?;
    let nested = matches!(value, Value::Map(_) | Value::List(_));
    if nested && depth >= MAX_NESTING_DEPTH {
        return Err(CodecError::TooDeep { offset: buf.len() });
    }

    buf.push(type_tag(value));
    buf.push(name_len);
    let len_pos = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(name.as_bytes());

    let data_start = buf.len();
    match value {
        Value::Int(n) => encode_s64(buf, *n),
        Value::Str(s) => buf.extend_from_slice(s.as_bytes()),
        Value::Bin(b) => buf.extend_from_slice(b),
        Value::Map(m) => encode_map_fields(buf, m, depth + 1)?,
        Value::List(items) => {
            for item in items {
                encode_field(buf, "", item, depth + 1)?;
            }
        }
    }

    let data_len =
        u32::try_from(buf.len() - data_start).map_err(|_| CodecError::DataTooLong(name.into()))?;
    buf[len_pos..len_pos + 4].copy_from_slice(&data_len.to_be_bytes());
    Ok(())
}

fn type_tag(value: &Value) -> u8 {
    match value {
        Value::Map(_) => field_type::MAP,
        Value::Int(_) => field_type::S64,
        Value::Str(_) => field_type::STR,
        Value::Bin(_) => field_type::BIN,
        Value::List(_) => field_type::LIST,
    }
}

/// Little-endian, minimal width. Negative values always take 8 bytes.
fn encode_s64(buf: &mut Vec<u8>, n: i64) {
    let mut u = n as u64;
    while u != 0 {
        buf.push(u as u8);
        u >>= 8;
    }
}

fn decode_s64(name: &str, data: &[u8]) -> Result<i64, CodecError> {
    if data.len() > 8 {
        return Err(CodecError::IntegerTooWide(name.into()));
    }
    let u = data
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (i * 8)));
    Ok(u as i64)
}

/// Decode a sequence of fields. `base` is the absolute offset of `data`
/// within the body, used for error reporting only. `depth` counts the
/// enclosing MAP/LIST fields.
fn decode_fields(data: &[u8], base: usize, depth: usize) -> Result<Vec<(String, Value)>, CodecError> {
    let mut fields = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let offset = base + pos;
        let remaining = data.len() - pos;
        if remaining < FIELD_HEADER_LEN {
            return Err(CodecError::TruncatedHeader { offset });
        }

        let field_type = data[pos];
        let name_len = data[pos + 1] as usize;
        let data_len = u32::from_be_bytes([data[pos + 2], data[pos + 3], data[pos + 4], data[pos + 5]])
            as usize;

        let declared = name_len + data_len;
        let available = remaining - FIELD_HEADER_LEN;
        if declared > available {
            return Err(CodecError::TruncatedField {
                offset,
                declared,
                available,
            });
        }

        let name_start = pos + FIELD_HEADER_LEN;
        let data_start = name_start + name_len;
        let data_end = data_start + data_len;

        let name = std::str::from_utf8(&data[name_start..data_start])
            .map_err(|_| CodecError::InvalidName(offset))?
            .to_owned();
        let raw = &data[data_start..data_end];

        let nested = matches!(field_type, field_type::MAP | field_type::LIST);
        if nested && depth >= MAX_NESTING_DEPTH {
            return Err(CodecError::TooDeep { offset });
        }

        let value = match field_type {
            field_type::S64 => Value::Int(decode_s64(&name, raw)?),
            field_type::STR => Value::Str(
                String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidString(name.clone()))?,
            ),
            field_type::BIN => Value::Bin(Bytes::copy_from_slice(raw)),
            field_type::MAP => Value::Map(
                decode_fields(raw, base + data_start, depth + 1)?
                    .into_iter()
                    .collect(),
            ),
            field_type::LIST => Value::List(
                decode_fields(raw, base + data_start, depth + 1)?
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect(),
            ),
            other => {
                return Err(CodecError::UnknownFieldType {
                    field_type: other,
                    offset,
                })
            }
        };

        fields.push((name, value));
        pos = data_end;
    }

    Ok(fields)
}
