//! Arbor: a page-organized B+ tree tuple file.
//!
//! Tuples of a fixed [`Schema`](storage::tuple::Schema) are kept in key order
//! in a single file of equal-size pages. Leaves hold the tuples and form a
//! singly linked chain for ordered scans; inner pages hold separator keys.
//! Pages stay at least half full under inserts and deletes, and
//! [`BTreeFile::verify`](storage::btree::BTreeFile::verify) checks every
//! structural invariant of a file.

#![warn(missing_docs)]

pub mod cli;
pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::pager::{FilePager, MemPager, PageStore, PagerOptions};
pub use storage::btree::{BTreeFile, BTreeOptions, TableStats, TupleCursor};
pub use storage::tuple::{Column, ColumnType, Schema, Tuple, Value};
pub use types::{ArborError, FilePointer, FileType, PageId, Result};
