use crate::storage::tuple::{Column, ColumnType, Schema, Tuple, Value};
use crate::types::{FilePointer, PageId};

use super::CliError;

/// Parses `name:type` pairs separated by commas, e.g.
/// `id:integer,name:varchar(32)`.
pub fn parse_columns(spec: &str) -> Result<Vec<Column>, CliError> {
    spec.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let bad = || CliError::ColumnSpec {
                spec: part.to_string(),
            };
            let (name, ty) = part.split_once(':').ok_or_else(bad)?;
            let name = name.trim();
            if name.is_empty() {
                return Err(bad());
            }
            let ty = ty.parse::<ColumnType>().map_err(|_| bad())?;
            Ok(Column::new(name, ty))
        })
        .collect()
}

/// Converts one field. `NULL` in any case is the null value.
pub fn parse_value(column: &Column, input: &str) -> Result<Value, CliError> {
    let text = input.trim();
    if text.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    let bad = || CliError::BadValue {
        column: column.name.clone(),
        ty: column.ty,
        input: text.to_string(),
    };
    let value = match column.ty {
        ColumnType::TinyInt => Value::TinyInt(text.parse().map_err(|_| bad())?),
        ColumnType::SmallInt => Value::SmallInt(text.parse().map_err(|_| bad())?),
        ColumnType::Integer => Value::Integer(text.parse().map_err(|_| bad())?),
        ColumnType::BigInt => Value::BigInt(text.parse().map_err(|_| bad())?),
        ColumnType::Float => Value::Float(text.parse().map_err(|_| bad())?),
        ColumnType::Double => Value::Double(text.parse().map_err(|_| bad())?),
        ColumnType::Char(_) | ColumnType::VarChar(_) => Value::Str(text.to_string()),
        ColumnType::FilePointer => Value::FilePointer(parse_file_pointer(text).ok_or_else(bad)?),
    };
    Ok(value)
}

/// Accepts `page:offset` or the display form `FP[page:offset]`.
fn parse_file_pointer(text: &str) -> Option<FilePointer> {
    let inner = text
        .strip_prefix("FP[")
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(text);
    let (page, offset) = inner.split_once(':')?;
    Some(FilePointer::new(
        PageId(page.trim().parse().ok()?),
        offset.trim().parse().ok()?,
    ))
}

fn fields(text: &str) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(',').collect()
}

/// A full row: one comma-separated field per column.
pub fn parse_row(schema: &Schema, text: &str) -> Result<Tuple, CliError> {
    let parts = fields(text);
    if parts.len() != schema.len() {
        return Err(CliError::Arity {
            expected: schema.len(),
            found: parts.len(),
        });
    }
    schema
        .columns()
        .iter()
        .zip(parts)
        .map(|(column, part)| parse_value(column, part))
        .collect::<Result<Vec<_>, _>>()
        .map(Tuple::new)
}

/// A search key: between one and `key_columns` leading key fields.
pub fn parse_key(schema: &Schema, text: &str) -> Result<Tuple, CliError> {
    let parts = fields(text);
    if parts.is_empty() || parts.len() > schema.key_columns() {
        return Err(CliError::Arity {
            expected: schema.key_columns(),
            found: parts.len(),
        });
    }
    schema
        .columns()
        .iter()
        .zip(parts)
        .map(|(column, part)| parse_value(column, part))
        .collect::<Result<Vec<_>, _>>()
        .map(Tuple::new)
}

/// JSON rendering used by `--format json`.
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::json;
    match value {
        Value::Null => serde_json::Value::Null,
        Value::TinyInt(v) => json!(v),
        Value::SmallInt(v) => json!(v),
        Value::Integer(v) => json!(v),
        Value::BigInt(v) => json!(v),
        Value::Float(v) => json!(v),
        Value::Double(v) => json!(v),
        Value::Str(v) => json!(v),
        Value::FilePointer(v) => json!(v.to_string()),
    }
}
