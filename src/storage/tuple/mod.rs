#![forbid(unsafe_code)]

//! Tuple values, schemas and the null-bitmap row encoding.
//!
//! A stored tuple is a null bitmap (`1 + (ncols - 1) / 8` bytes, bit `c % 8`
//! of byte `c / 8` set when column `c` is NULL) followed by the big-endian
//! bytes of every non-NULL column in order. NULL columns take no space.

mod codec;
mod schema;
mod value;

use std::cmp::Ordering;
use std::fmt;

pub use codec::{decode_tuple, encode_tuple, encoded_len, stored_len};
pub use schema::{Column, ColumnType, Schema};
pub use value::{compare_values, Value};

/// An ordered list of column values.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Tuple(Vec<Value>);

impl Tuple {
    /// Wraps a list of values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// All values.
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Value at `idx`, if present.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty tuple, which sorts before every other tuple.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Leading `n` values as a new tuple.
    pub fn prefix(&self, n: usize) -> Tuple {
        Tuple(self.0.iter().take(n).cloned().collect())
    }

    /// Consumes the tuple, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Tuple(values)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, value) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}

/// Compares two tuples over their first `columns` values. Both must carry at
/// least that many values.
pub fn compare_tuples(a: &Tuple, b: &Tuple, columns: usize) -> Ordering {
    a.0.iter()
        .zip(b.0.iter())
        .take(columns)
        .map(|(x, y)| compare_values(x, y))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Prefix comparison used by searches. An empty `search` sorts before any
/// non-empty tuple; otherwise the shorter length decides how many columns are
/// compared and an equal prefix counts as equal.
pub fn compare_partial(search: &Tuple, tuple: &Tuple) -> Ordering {
    match (search.is_empty(), tuple.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_tuples(search, tuple, search.len().min(tuple.len())),
    }
}
