use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;

/// Snapshot of tree maintenance counters at a point in time.
#[derive(Default, Debug, Clone, Copy, Serialize)]
pub struct BTreeStatsSnapshot {
    /// Leaf pages split in two.
    pub leaf_splits: u64,
    /// Inner pages split in two.
    pub inner_splits: u64,
    /// Leaf pages merged into a sibling.
    pub leaf_coalesces: u64,
    /// Inner pages merged into a sibling.
    pub inner_coalesces: u64,
    /// Leaf inserts that made room by moving tuples to a sibling.
    pub leaf_relocations: u64,
    /// Inner inserts that made room by moving entries to a sibling.
    pub inner_relocations: u64,
    /// Underfull leaves refilled from a sibling.
    pub leaf_redistributions: u64,
    /// Underfull inner pages refilled from a sibling.
    pub inner_redistributions: u64,
    /// New roots created, each adding one level.
    pub root_splits: u64,
    /// Roots removed, each dropping one level or emptying the tree.
    pub root_collapses: u64,
    /// Pages handed out for new nodes.
    pub pages_allocated: u64,
    /// Pages returned to the free list.
    pub pages_released: u64,
}

/// Thread-safe counters for tree maintenance work.
#[derive(Default)]
pub struct BTreeStats {
    leaf_splits: AtomicU64,
    inner_splits: AtomicU64,
    leaf_coalesces: AtomicU64,
    inner_coalesces: AtomicU64,
    leaf_relocations: AtomicU64,
    inner_relocations: AtomicU64,
    leaf_redistributions: AtomicU64,
    inner_redistributions: AtomicU64,
    root_splits: AtomicU64,
    root_collapses: AtomicU64,
    pages_allocated: AtomicU64,
    pages_released: AtomicU64,
}

macro_rules! counter {
    ($get:ident, $inc:ident) => {
        #[doc = concat!("Current value of the `", stringify!($get), "` counter.")]
        pub fn $get(&self) -> u64 {
            self.$get.load(AtomicOrdering::Relaxed)
        }

        pub(crate) fn $inc(&self) {
            self.$get.fetch_add(1, AtomicOrdering::Relaxed);
        }
    };
}

impl BTreeStats {
    counter!(leaf_splits, inc_leaf_splits);
    counter!(inner_splits, inc_inner_splits);
    counter!(leaf_coalesces, inc_leaf_coalesces);
    counter!(inner_coalesces, inc_inner_coalesces);
    counter!(leaf_relocations, inc_leaf_relocations);
    counter!(inner_relocations, inc_inner_relocations);
    counter!(leaf_redistributions, inc_leaf_redistributions);
    counter!(inner_redistributions, inc_inner_redistributions);
    counter!(root_splits, inc_root_splits);
    counter!(root_collapses, inc_root_collapses);
    counter!(pages_allocated, inc_pages_allocated);
    counter!(pages_released, inc_pages_released);

    /// Creates a snapshot of all current counters.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            leaf_splits: self.leaf_splits(),
            inner_splits: self.inner_splits(),
            leaf_coalesces: self.leaf_coalesces(),
            inner_coalesces: self.inner_coalesces(),
            leaf_relocations: self.leaf_relocations(),
            inner_relocations: self.inner_relocations(),
            leaf_redistributions: self.leaf_redistributions(),
            inner_redistributions: self.inner_redistributions(),
            root_splits: self.root_splits(),
            root_collapses: self.root_collapses(),
            pages_allocated: self.pages_allocated(),
            pages_released: self.pages_released(),
        }
    }

    /// Emits current counters to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "arbor::btree::stats",
            leaf_splits = snapshot.leaf_splits,
            inner_splits = snapshot.inner_splits,
            leaf_coalesces = snapshot.leaf_coalesces,
            inner_coalesces = snapshot.inner_coalesces,
            leaf_relocations = snapshot.leaf_relocations,
            inner_relocations = snapshot.inner_relocations,
            leaf_redistributions = snapshot.leaf_redistributions,
            inner_redistributions = snapshot.inner_redistributions,
            root_splits = snapshot.root_splits,
            root_collapses = snapshot.root_collapses,
            pages_allocated = snapshot.pages_allocated,
            pages_released = snapshot.pages_released,
            "btree stats snapshot"
        );
    }
}
