//! Low-level building blocks for the storage engine.

/// Positional file I/O.
pub mod io;

/// Page stores: the file-backed buffer pool and the in-memory store.
pub mod pager;
