use super::{ColumnType, Schema, Tuple, Value};
use crate::types::{ArborError, FilePointer, PageId, Result};

const PAST_END: ArborError = ArborError::Corruption("tuple extends past end of page");

fn value_len(ty: ColumnType, value: &Value) -> Result<usize> {
    let matches = matches!(
        (ty, value),
        (ColumnType::TinyInt, Value::TinyInt(_))
            | (ColumnType::SmallInt, Value::SmallInt(_))
            | (ColumnType::Integer, Value::Integer(_))
            | (ColumnType::BigInt, Value::BigInt(_))
            | (ColumnType::Float, Value::Float(_))
            | (ColumnType::Double, Value::Double(_))
            | (ColumnType::Char(_), Value::Str(_))
            | (ColumnType::VarChar(_), Value::Str(_))
            | (ColumnType::FilePointer, Value::FilePointer(_))
    );
    if !matches {
        return Err(ArborError::Invalid("value does not match column type"));
    }
    match (ty, value) {
        (ColumnType::Char(n), Value::Str(s)) | (ColumnType::VarChar(n), Value::Str(s))
            if s.len() > usize::from(n) =>
        {
            Err(ArborError::Invalid("string longer than column width"))
        }
        (ColumnType::VarChar(_), Value::Str(s)) => Ok(2 + s.len()),
        _ => ty
            .fixed_size()
            .ok_or(ArborError::Invalid("value does not match column type")),
    }
}

/// Encoded size of `tuple`, validating it against `schema`.
pub fn encoded_len(schema: &Schema, tuple: &Tuple) -> Result<usize> {
    if tuple.len() != schema.len() {
        return Err(ArborError::Invalid("tuple arity does not match schema"));
    }
    let mut len = schema.null_bitmap_len();
    for (column, value) in schema.columns().iter().zip(tuple.values()) {
        if !value.is_null() {
            len += value_len(column.ty, value)?;
        }
    }
    Ok(len)
}

/// Serializes `tuple` into its stored byte form.
pub fn encode_tuple(schema: &Schema, tuple: &Tuple) -> Result<Vec<u8>> {
    let len = encoded_len(schema, tuple)?;
    let mut out = vec![0u8; schema.null_bitmap_len()];
    out.reserve(len - out.len());
    for (idx, (column, value)) in schema.columns().iter().zip(tuple.values()).enumerate() {
        match (column.ty, value) {
            (_, Value::Null) => out[idx / 8] |= 1 << (idx % 8),
            (_, Value::TinyInt(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (_, Value::SmallInt(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (_, Value::Integer(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (_, Value::BigInt(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (_, Value::Float(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (_, Value::Double(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (ColumnType::Char(n), Value::Str(s)) => {
                out.extend_from_slice(s.as_bytes());
                out.resize(out.len() + usize::from(n) - s.len(), 0);
            }
            (_, Value::Str(s)) => {
                out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            (_, Value::FilePointer(fp)) => {
                out.extend_from_slice(&fp.page.0.to_be_bytes());
                out.extend_from_slice(&fp.offset.to_be_bytes());
            }
        }
    }
    debug_assert_eq!(out.len(), len);
    Ok(out)
}

fn is_null(buf: &[u8], start: usize, column: usize) -> bool {
    buf[start + column / 8] & (1 << (column % 8)) != 0
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16> {
    let bytes = buf.get(at..at + 2).ok_or(PAST_END)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Length of the tuple stored at `offset` without decoding its values.
pub fn stored_len(schema: &Schema, buf: &[u8], offset: usize) -> Result<usize> {
    let mut pos = offset + schema.null_bitmap_len();
    if pos > buf.len() {
        return Err(PAST_END);
    }
    for (idx, column) in schema.columns().iter().enumerate() {
        if is_null(buf, offset, idx) {
            continue;
        }
        pos += match column.ty.fixed_size() {
            Some(size) => size,
            None => 2 + usize::from(read_u16(buf, pos)?),
        };
    }
    if pos > buf.len() {
        return Err(PAST_END);
    }
    Ok(pos - offset)
}

/// Decodes the tuple stored at `offset`.
pub fn decode_tuple(schema: &Schema, buf: &[u8], offset: usize) -> Result<Tuple> {
    let len = stored_len(schema, buf, offset)?;
    let mut pos = offset + schema.null_bitmap_len();
    let mut values = Vec::with_capacity(schema.len());
    for (idx, column) in schema.columns().iter().enumerate() {
        if is_null(buf, offset, idx) {
            values.push(Value::Null);
            continue;
        }
        let value = match column.ty {
            ColumnType::TinyInt => Value::TinyInt(buf[pos] as i8),
            ColumnType::SmallInt => Value::SmallInt(read_u16(buf, pos)? as i16),
            ColumnType::Integer => Value::Integer(i32::from_be_bytes(array(buf, pos)?)),
            ColumnType::BigInt => Value::BigInt(i64::from_be_bytes(array(buf, pos)?)),
            ColumnType::Float => Value::Float(f32::from_be_bytes(array(buf, pos)?)),
            ColumnType::Double => Value::Double(f64::from_be_bytes(array(buf, pos)?)),
            ColumnType::Char(n) => {
                let raw = &buf[pos..pos + usize::from(n)];
                let trimmed = match raw.iter().rposition(|b| *b != 0) {
                    Some(last) => &raw[..=last],
                    None => &raw[..0],
                };
                Value::Str(utf8(trimmed)?)
            }
            ColumnType::VarChar(_) => {
                let n = usize::from(read_u16(buf, pos)?);
                Value::Str(utf8(&buf[pos + 2..pos + 2 + n])?)
            }
            ColumnType::FilePointer => Value::FilePointer(FilePointer::new(
                PageId(read_u16(buf, pos)?),
                read_u16(buf, pos + 2)?,
            )),
        };
        pos += match column.ty.fixed_size() {
            Some(size) => size,
            None => 2 + usize::from(read_u16(buf, pos)?),
        };
        values.push(value);
    }
    debug_assert_eq!(pos - offset, len);
    Ok(Tuple::new(values))
}

fn array<const N: usize>(buf: &[u8], at: usize) -> Result<[u8; N]> {
    buf.get(at..at + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(PAST_END)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ArborError::Corruption("text column is not utf-8"))
}
