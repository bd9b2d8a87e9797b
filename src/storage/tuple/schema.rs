use std::fmt;
use std::str::FromStr;

use crate::types::{ArborError, Result};

/// Storage type of one column.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ColumnType {
    /// 1-byte signed integer.
    TinyInt,
    /// 2-byte signed integer.
    SmallInt,
    /// 4-byte signed integer.
    Integer,
    /// 8-byte signed integer.
    BigInt,
    /// 4-byte float.
    Float,
    /// 8-byte float.
    Double,
    /// Fixed-width text of exactly `n` bytes, zero padded.
    Char(u16),
    /// Text of at most `n` bytes behind a u16 length prefix.
    VarChar(u16),
    /// Page number plus byte offset.
    FilePointer,
}

impl ColumnType {
    fn tag(self) -> u8 {
        match self {
            ColumnType::TinyInt => 1,
            ColumnType::SmallInt => 2,
            ColumnType::Integer => 3,
            ColumnType::BigInt => 4,
            ColumnType::Float => 5,
            ColumnType::Double => 6,
            ColumnType::Char(_) => 7,
            ColumnType::VarChar(_) => 8,
            ColumnType::FilePointer => 9,
        }
    }

    fn length(self) -> u16 {
        match self {
            ColumnType::Char(n) | ColumnType::VarChar(n) => n,
            _ => 0,
        }
    }

    fn from_parts(tag: u8, length: u16) -> Result<Self> {
        Ok(match tag {
            1 => ColumnType::TinyInt,
            2 => ColumnType::SmallInt,
            3 => ColumnType::Integer,
            4 => ColumnType::BigInt,
            5 => ColumnType::Float,
            6 => ColumnType::Double,
            7 => ColumnType::Char(length),
            8 => ColumnType::VarChar(length),
            9 => ColumnType::FilePointer,
            _ => return Err(ArborError::Corruption("unknown column type tag")),
        })
    }

    /// Stored width for fixed-size types; `None` for VARCHAR.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ColumnType::TinyInt => Some(1),
            ColumnType::SmallInt => Some(2),
            ColumnType::Integer | ColumnType::Float | ColumnType::FilePointer => Some(4),
            ColumnType::BigInt | ColumnType::Double => Some(8),
            ColumnType::Char(n) => Some(usize::from(n)),
            ColumnType::VarChar(_) => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::TinyInt => write!(f, "TINYINT"),
            ColumnType::SmallInt => write!(f, "SMALLINT"),
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::BigInt => write!(f, "BIGINT"),
            ColumnType::Float => write!(f, "FLOAT"),
            ColumnType::Double => write!(f, "DOUBLE"),
            ColumnType::Char(n) => write!(f, "CHAR({n})"),
            ColumnType::VarChar(n) => write!(f, "VARCHAR({n})"),
            ColumnType::FilePointer => write!(f, "FILE_POINTER"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = ArborError;

    /// Parses names such as `integer`, `bigint` or `varchar(32)`.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let (name, length) = match lower.split_once('(') {
            Some((name, rest)) => {
                let digits = rest
                    .strip_suffix(')')
                    .ok_or(ArborError::Invalid("unterminated column length"))?;
                let length = digits
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| ArborError::Invalid("column length is not a number"))?;
                (name.trim().to_string(), Some(length))
            }
            None => (lower, None),
        };
        let ty = match (name.as_str(), length) {
            ("tinyint", None) => ColumnType::TinyInt,
            ("smallint", None) => ColumnType::SmallInt,
            ("integer" | "int", None) => ColumnType::Integer,
            ("bigint", None) => ColumnType::BigInt,
            ("float", None) => ColumnType::Float,
            ("double", None) => ColumnType::Double,
            ("char", Some(n)) => ColumnType::Char(n),
            ("varchar", Some(n)) => ColumnType::VarChar(n),
            ("file_pointer", None) => ColumnType::FilePointer,
            _ => return Err(ArborError::Invalid("unknown column type")),
        };
        Ok(ty)
    }
}

/// A named column.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Column {
    /// Column name, at most 255 bytes.
    pub name: String,
    /// Storage type.
    pub ty: ColumnType,
}

impl Column {
    /// Creates a column.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Column layout of the tuples in one file.
///
/// The first `key_columns` columns form the ordering key. Separator keys in
/// inner pages are encoded with [`Schema::key_schema`].
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Schema {
    columns: Vec<Column>,
    key_columns: usize,
}

impl Schema {
    /// Creates a schema whose key is the first `key_columns` columns.
    pub fn new(columns: Vec<Column>, key_columns: usize) -> Result<Self> {
        if columns.is_empty() {
            return Err(ArborError::Invalid("schema needs at least one column"));
        }
        if columns.len() > usize::from(u8::MAX) {
            return Err(ArborError::Invalid("schema has too many columns"));
        }
        if key_columns == 0 || key_columns > columns.len() {
            return Err(ArborError::Invalid("key column count out of range"));
        }
        if columns.iter().any(|c| c.name.len() > usize::from(u8::MAX)) {
            return Err(ArborError::Invalid("column name longer than 255 bytes"));
        }
        Ok(Self {
            columns,
            key_columns,
        })
    }

    /// Creates a schema keyed on every column.
    pub fn keyed_on_all(columns: Vec<Column>) -> Result<Self> {
        let n = columns.len();
        Self::new(columns, n)
    }

    /// All columns in storage order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always false; schemas hold at least one column.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Number of leading key columns.
    pub fn key_columns(&self) -> usize {
        self.key_columns
    }

    /// Schema of the separator keys stored in inner pages.
    pub fn key_schema(&self) -> Schema {
        Schema {
            columns: self.columns[..self.key_columns].to_vec(),
            key_columns: self.key_columns,
        }
    }

    /// Bytes used by the null bitmap at the start of every tuple.
    pub fn null_bitmap_len(&self) -> usize {
        if self.columns.is_empty() {
            0
        } else {
            1 + (self.columns.len() - 1) / 8
        }
    }

    /// Serializes the schema for the header page.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.columns.len() * 8);
        out.push(self.columns.len() as u8);
        out.push(self.key_columns as u8);
        for column in &self.columns {
            out.push(column.ty.tag());
            out.extend_from_slice(&column.ty.length().to_be_bytes());
            out.push(column.name.len() as u8);
            out.extend_from_slice(column.name.as_bytes());
        }
        out
    }

    /// Parses a schema written by [`Schema::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        const TRUNCATED: ArborError = ArborError::Corruption("schema blob truncated");
        let (&count, rest) = bytes.split_first().ok_or(TRUNCATED)?;
        let (&key_columns, mut rest) = rest.split_first().ok_or(TRUNCATED)?;
        let mut columns = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            if rest.len() < 4 {
                return Err(TRUNCATED);
            }
            let length = u16::from_be_bytes([rest[1], rest[2]]);
            let ty = ColumnType::from_parts(rest[0], length)?;
            let name_len = usize::from(rest[3]);
            let name_bytes = rest.get(4..4 + name_len).ok_or(TRUNCATED)?;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|_| ArborError::Corruption("column name is not utf-8"))?;
            columns.push(Column::new(name, ty));
            rest = &rest[4 + name_len..];
        }
        Schema::new(columns, usize::from(key_columns))
            .map_err(|_| ArborError::Corruption("schema blob is inconsistent"))
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, column) in self.columns.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", column.name, column.ty)?;
            if idx < self.key_columns {
                write!(f, " KEY")?;
            }
        }
        Ok(())
    }
}
