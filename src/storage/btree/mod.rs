#![forbid(unsafe_code)]

//! Page-organized B+ tree tuple file.
//!
//! Page 0 holds the header (root, first leaf, free-list head, schema and
//! statistics blobs). Every other page is an inner node, a leaf or a free
//! page. Leaves are chained in key order; inner nodes carry no parent links,
//! so maintenance works from the root-to-node path of each descent.

mod alloc;
mod analyze;
mod context;
mod cursor;
mod file;
mod header;
mod inner;
mod inner_ops;
mod leaf;
mod leaf_ops;
mod nav;
/// Byte layout shared by inner and leaf pages.
pub mod page;
mod stats;
mod verify;

pub use analyze::{TableStats, TABLE_STATS_LEN};
pub use context::BTreeOptions;
pub use cursor::{CursorState, SlotPosition, TupleCursor};
pub use file::{BTreeFile, Scan, TreeInfo};
pub use header::TreeHeader;
pub use inner::{Descend, InnerPage};
pub use leaf::LeafPage;
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use verify::VerifyReport;
