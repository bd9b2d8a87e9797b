//! Row encoding and the B+ tree built on top of the pager.

/// B+ tree tuple file: page views, rebalancing, cursors and verification.
pub mod btree;

/// Column types, schemas, values and the tuple byte format.
pub mod tuple;
