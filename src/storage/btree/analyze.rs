use serde::Serialize;

use crate::types::{ArborError, PageId, Result};

use super::alloc::free_list_pages;
use super::context::{Node, TreeContext};

/// Size of the statistics blob kept in the header page.
pub const TABLE_STATS_LEN: usize = 32;

/// Table statistics gathered by a full tree walk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TableStats {
    /// Stored tuples.
    pub num_tuples: u64,
    /// Leaf pages reachable from the root.
    pub leaf_pages: u32,
    /// Inner pages reachable from the root.
    pub inner_pages: u32,
    /// Pages on the free list.
    pub empty_pages: u32,
    /// Levels from the root down to the leaves; 0 for an empty tree.
    pub depth: u32,
    /// Mean encoded tuple size in bytes.
    pub avg_tuple_size: f32,
    /// Mean fraction of each leaf page in use, header included.
    pub avg_leaf_fill: f32,
}

impl TableStats {
    /// Big-endian header blob.
    pub fn to_bytes(&self) -> [u8; TABLE_STATS_LEN] {
        let mut out = [0u8; TABLE_STATS_LEN];
        out[0..8].copy_from_slice(&self.num_tuples.to_be_bytes());
        out[8..12].copy_from_slice(&self.leaf_pages.to_be_bytes());
        out[12..16].copy_from_slice(&self.inner_pages.to_be_bytes());
        out[16..20].copy_from_slice(&self.empty_pages.to_be_bytes());
        out[20..24].copy_from_slice(&self.depth.to_be_bytes());
        out[24..28].copy_from_slice(&self.avg_tuple_size.to_be_bytes());
        out[28..32].copy_from_slice(&self.avg_leaf_fill.to_be_bytes());
        out
    }

    /// Parses a blob written by [`TableStats::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; TABLE_STATS_LEN] = bytes
            .try_into()
            .map_err(|_| ArborError::Corruption("statistics blob has the wrong length"))?;
        let u32_at = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let f32_at = |at: usize| f32::from_bits(u32_at(at));
        let mut num_tuples = [0u8; 8];
        num_tuples.copy_from_slice(&bytes[0..8]);
        Ok(Self {
            num_tuples: u64::from_be_bytes(num_tuples),
            leaf_pages: u32_at(8),
            inner_pages: u32_at(12),
            empty_pages: u32_at(16),
            depth: u32_at(20),
            avg_tuple_size: f32_at(24),
            avg_leaf_fill: f32_at(28),
        })
    }
}

/// Walks the tree level by level and the free list.
pub(crate) fn collect(ctx: &TreeContext) -> Result<TableStats> {
    let header = ctx.header()?;
    let mut stats = TableStats {
        empty_pages: free_list_pages(ctx, header.free_list_head())?.len() as u32,
        ..TableStats::default()
    };
    let root = header.root();
    if root.is_null() {
        return Ok(stats);
    }

    let page_size = ctx.page_size() as f64;
    let limit = ctx.store.num_pages() as usize;
    let (mut tuple_bytes, mut fill) = (0u64, 0f64);
    let mut visited = 0usize;
    let mut level: Vec<PageId> = vec![root];
    while !level.is_empty() {
        stats.depth += 1;
        let mut below = Vec::new();
        for id in level {
            visited += 1;
            if visited > limit {
                return Err(ArborError::Corruption("tree walk revisits pages"));
            }
            match ctx.load_node(id)? {
                Node::Inner(inner) => {
                    stats.inner_pages += 1;
                    below.extend(inner.pointers());
                }
                Node::Leaf(leaf) => {
                    stats.leaf_pages += 1;
                    stats.num_tuples += leaf.num_tuples() as u64;
                    tuple_bytes += leaf.tuple_bytes() as u64;
                    fill += leaf.used_space() as f64 / page_size;
                }
            }
        }
        level = below;
    }
    if stats.num_tuples > 0 {
        stats.avg_tuple_size = (tuple_bytes as f64 / stats.num_tuples as f64) as f32;
    }
    if stats.leaf_pages > 0 {
        stats.avg_leaf_fill = (fill / f64::from(stats.leaf_pages)) as f32;
    }
    Ok(stats)
}
