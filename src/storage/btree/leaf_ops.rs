//! Leaf-level tree maintenance: insertion with relocation or split, and
//! deletion with coalescing or redistribution.

use tracing::{debug, warn};

use crate::types::{ArborError, PageId, Result};

use super::context::TreeContext;
use super::cursor::SlotPosition;
use super::inner::InnerPage;
use super::inner_ops::InnerRebalancer;
use super::leaf::LeafPage;
use super::nav::TreeNavigator;
use super::page::ENTRIES_OFFSET;

/// Same-parent neighbours of a node.
struct Siblings {
    left: Option<PageId>,
    right: Option<PageId>,
}

fn siblings(ctx: &TreeContext, path: &[PageId]) -> Result<Siblings> {
    let (node, parent) = match path {
        [.., parent, node] => (*node, *parent),
        _ => return Ok(Siblings { left: None, right: None }),
    };
    let parent = ctx.load_inner(parent)?;
    let idx = parent
        .index_of_pointer(node)
        .ok_or(ArborError::Corruption("page path does not match parent pointers"))?;
    Ok(Siblings {
        left: idx.checked_sub(1).map(|i| parent.pointer(i)),
        right: (idx + 1 < parent.num_pointers()).then(|| parent.pointer(idx + 1)),
    })
}

pub(super) fn parent_path(path: &[PageId]) -> &[PageId] {
    &path[..path.len().saturating_sub(1)]
}

pub(crate) struct LeafRebalancer<'a> {
    ctx: &'a TreeContext,
}

impl<'a> LeafRebalancer<'a> {
    pub fn new(ctx: &'a TreeContext) -> Self {
        Self { ctx }
    }

    /// Stores the encoded tuple `bytes` whose sorted position in `leaf` is
    /// `idx`, and returns the slot where it landed.
    pub fn insert(
        &self,
        mut leaf: LeafPage,
        path: &[PageId],
        idx: usize,
        bytes: &[u8],
    ) -> Result<SlotPosition> {
        if bytes.len() <= leaf.free_space() {
            leaf.insert_at(idx, bytes)?;
            return Ok(SlotPosition::new(leaf.page_id(), idx));
        }
        let siblings = siblings(self.ctx, path)?;
        if let Some(left) = siblings.left {
            let mut left = self.ctx.load_leaf(left)?;
            if let Some(slot) = self.relocate_left(&mut left, &mut leaf, path, idx, bytes)? {
                return Ok(slot);
            }
        }
        if let Some(right) = siblings.right {
            let mut right = self.ctx.load_leaf(right)?;
            if let Some(slot) = self.relocate_right(&mut leaf, &mut right, path, idx, bytes)? {
                return Ok(slot);
            }
        }
        self.split(leaf, path, idx, bytes)
    }

    /// Shifts leading tuples of `leaf` into `left` so the new tuple fits in
    /// one of the two pages.
    fn relocate_left(
        &self,
        left: &mut LeafPage,
        leaf: &mut LeafPage,
        path: &[PageId],
        idx: usize,
        bytes: &[u8],
    ) -> Result<Option<SlotPosition>> {
        let len = bytes.len();
        let n = leaf.num_tuples();
        let mut moved = 0;
        let mut count = None;
        for c in 1..n {
            moved += leaf.tuple_size(c - 1);
            if moved > left.free_space() {
                break;
            }
            let fits = if idx <= c {
                left.free_space() >= moved + len
            } else {
                leaf.free_space() + moved >= len
            };
            if fits {
                count = Some(c);
                break;
            }
        }
        let Some(count) = count else {
            return Ok(None);
        };

        let left_len = left.num_tuples();
        leaf.move_tuples_left(left, count)?;
        let slot = if idx <= count {
            left.insert_at(left_len + idx, bytes)?;
            SlotPosition::new(left.page_id(), left_len + idx)
        } else {
            leaf.insert_at(idx - count, bytes)?;
            SlotPosition::new(leaf.page_id(), idx - count)
        };
        self.ctx.stats.inc_leaf_relocations();
        debug!(
            target: "arbor::btree",
            page = leaf.page_id().0,
            sibling = left.page_id().0,
            moved = count,
            "relocated tuples to left leaf"
        );
        let separator = self.ctx.encode_key(&leaf.key(0)?)?;
        InnerRebalancer::new(self.ctx).replace_key(
            parent_path(path),
            left.page_id(),
            &separator,
            leaf.page_id(),
        )?;
        Ok(Some(slot))
    }

    /// Shifts trailing tuples of `leaf` into `right`.
    fn relocate_right(
        &self,
        leaf: &mut LeafPage,
        right: &mut LeafPage,
        path: &[PageId],
        idx: usize,
        bytes: &[u8],
    ) -> Result<Option<SlotPosition>> {
        let len = bytes.len();
        let n = leaf.num_tuples();
        let mut moved = 0;
        let mut count = None;
        for c in 1..n {
            moved += leaf.tuple_size(n - c);
            if moved > right.free_space() {
                break;
            }
            let fits = if idx <= n - c {
                leaf.free_space() + moved >= len
            } else {
                right.free_space() >= moved + len
            };
            if fits {
                count = Some(c);
                break;
            }
        }
        let Some(count) = count else {
            return Ok(None);
        };

        let keep = n - count;
        leaf.move_tuples_right(right, count)?;
        let slot = if idx <= keep {
            leaf.insert_at(idx, bytes)?;
            SlotPosition::new(leaf.page_id(), idx)
        } else {
            right.insert_at(idx - keep, bytes)?;
            SlotPosition::new(right.page_id(), idx - keep)
        };
        self.ctx.stats.inc_leaf_relocations();
        debug!(
            target: "arbor::btree",
            page = leaf.page_id().0,
            sibling = right.page_id().0,
            moved = count,
            "relocated tuples to right leaf"
        );
        let separator = self.ctx.encode_key(&right.key(0)?)?;
        InnerRebalancer::new(self.ctx).replace_key(
            parent_path(path),
            leaf.page_id(),
            &separator,
            right.page_id(),
        )?;
        Ok(Some(slot))
    }

    /// Splits `leaf` around a byte-balanced point and links the new leaf into
    /// the chain right after it.
    fn split(
        &self,
        mut leaf: LeafPage,
        path: &[PageId],
        idx: usize,
        bytes: &[u8],
    ) -> Result<SlotPosition> {
        let n = leaf.num_tuples();
        let capacity = leaf.total_space() - ENTRIES_OFFSET;
        let sizes: Vec<usize> = (0..=n)
            .map(|i| match i.cmp(&idx) {
                std::cmp::Ordering::Less => leaf.tuple_size(i),
                std::cmp::Ordering::Equal => bytes.len(),
                std::cmp::Ordering::Greater => leaf.tuple_size(i - 1),
            })
            .collect();
        let total: usize = sizes.iter().sum();
        let mut best: Option<(usize, usize)> = None;
        let mut left_bytes = 0;
        for k in 1..=n {
            left_bytes += sizes[k - 1];
            let right_bytes = total - left_bytes;
            if left_bytes > capacity || right_bytes > capacity {
                continue;
            }
            let diff = left_bytes.abs_diff(right_bytes);
            if best.map_or(true, |(_, d)| diff < d) {
                best = Some((k, diff));
            }
        }
        let (k, _) = best.ok_or(ArborError::TupleTooLarge {
            size: bytes.len(),
            max: capacity,
        })?;

        let page = self.ctx.allocator().allocate()?;
        let mut fresh = LeafPage::init(page, self.ctx.schema.clone());
        fresh.set_next_page(leaf.next_page());
        leaf.set_next_page(fresh.page_id());

        let existing_left = if idx < k { k - 1 } else { k };
        leaf.move_tuples_right(&mut fresh, n - existing_left)?;
        let slot = if idx < k {
            leaf.insert_at(idx, bytes)?;
            SlotPosition::new(leaf.page_id(), idx)
        } else {
            fresh.insert_at(idx - existing_left, bytes)?;
            SlotPosition::new(fresh.page_id(), idx - existing_left)
        };
        self.ctx.stats.inc_leaf_splits();
        debug!(
            target: "arbor::btree",
            page = leaf.page_id().0,
            new_page = fresh.page_id().0,
            left = leaf.num_tuples(),
            right = fresh.num_tuples(),
            "split leaf"
        );

        let separator = self.ctx.encode_key(&fresh.key(0)?)?;
        if path.len() <= 1 {
            self.grow_root(leaf.page_id(), &separator, fresh.page_id())?;
        } else {
            InnerRebalancer::new(self.ctx).add_entry(
                parent_path(path),
                leaf.page_id(),
                &separator,
                fresh.page_id(),
            )?;
        }
        Ok(slot)
    }

    fn grow_root(&self, left: PageId, separator: &[u8], right: PageId) -> Result<()> {
        let page = self.ctx.allocator().allocate()?;
        let root = InnerPage::init_root(page, self.ctx.key_schema.clone(), left, separator, right)?;
        self.ctx.header()?.set_root(root.page_id());
        self.ctx.stats.inc_root_splits();
        debug!(target: "arbor::btree", root = root.page_id().0, "new root above split leaf");
        Ok(())
    }

    /// Removes tuple `idx` from `leaf` and rebalances. Returns the slot of the
    /// tuple that followed the removed one, if any.
    pub fn delete(
        &self,
        mut leaf: LeafPage,
        path: &[PageId],
        idx: usize,
    ) -> Result<Option<SlotPosition>> {
        leaf.delete_at(idx)?;
        let next = leaf.next_page();
        let mut resume = if idx < leaf.num_tuples() {
            Some(SlotPosition::new(leaf.page_id(), idx))
        } else if !next.is_null() {
            Some(SlotPosition::new(next, 0))
        } else {
            None
        };

        if path.len() <= 1 {
            if leaf.num_tuples() == 0 {
                let header = self.ctx.header()?;
                header.set_root(PageId(0));
                header.set_first_leaf(PageId(0));
                self.ctx.allocator().release(leaf.page())?;
                self.ctx.stats.inc_root_collapses();
                debug!(target: "arbor::btree", page = leaf.page_id().0, "tree emptied");
                resume = None;
            }
            return Ok(resume);
        }
        let half = self.ctx.half_full();
        if leaf.used_space() >= half {
            return Ok(resume);
        }

        let siblings = siblings(self.ctx, path)?;
        let total = leaf.total_space();
        let inner = InnerRebalancer::new(self.ctx);
        let mut left = siblings.left.map(|id| self.ctx.load_leaf(id)).transpose()?;
        let mut right = siblings.right.map(|id| self.ctx.load_leaf(id)).transpose()?;

        if let Some(left) = left.as_mut() {
            if left.used_space() + leaf.tuple_bytes() <= total {
                let count = leaf.num_tuples();
                let left_len = left.num_tuples();
                leaf.move_tuples_left(left, count)?;
                left.set_next_page(next);
                resume = resume
                    .map(|s| s.after_move_left(leaf.page_id(), left.page_id(), count, left_len));
                self.ctx.allocator().release(leaf.page())?;
                self.ctx.stats.inc_leaf_coalesces();
                debug!(
                    target: "arbor::btree",
                    page = leaf.page_id().0,
                    sibling = left.page_id().0,
                    "coalesced leaf into left sibling"
                );
                inner.delete_pointer(parent_path(path), leaf.page_id(), false)?;
                return Ok(resume);
            }
        }

        if let Some(right) = right.as_mut() {
            if right.used_space() + leaf.tuple_bytes() <= total {
                let predecessor = TreeNavigator::new(self.ctx).chain_predecessor(path)?;
                let count = leaf.num_tuples();
                leaf.move_tuples_right(right, count)?;
                resume = resume
                    .map(|s| s.after_move_right(leaf.page_id(), right.page_id(), count, count));
                match predecessor {
                    Some(prev) => self.ctx.load_leaf(prev)?.set_next_page(right.page_id()),
                    None => self.ctx.header()?.set_first_leaf(right.page_id()),
                }
                self.ctx.allocator().release(leaf.page())?;
                self.ctx.stats.inc_leaf_coalesces();
                debug!(
                    target: "arbor::btree",
                    page = leaf.page_id().0,
                    sibling = right.page_id().0,
                    "coalesced leaf into right sibling"
                );
                inner.delete_pointer(parent_path(path), leaf.page_id(), true)?;
                return Ok(resume);
            }
        }

        let take_left = match (&left, &right) {
            (Some(l), Some(r)) => l.used_space() >= r.used_space(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return Err(ArborError::Corruption("non-root leaf without siblings")),
        };

        if take_left {
            if let Some(left) = left.as_mut() {
                let count = fill_count(
                    (0..left.num_tuples()).rev().map(|i| left.tuple_size(i)),
                    left.used_space(),
                    leaf.used_space(),
                    half,
                    total,
                );
                if count == 0 {
                    warn!(
                        target: "arbor::btree",
                        page = leaf.page_id().0,
                        "leaf left underfull, no tuple can move"
                    );
                    return Ok(resume);
                }
                let left_len = left.num_tuples();
                left.move_tuples_right(&mut leaf, count)?;
                resume = resume
                    .map(|s| s.after_move_right(left.page_id(), leaf.page_id(), count, left_len));
                let separator = self.ctx.encode_key(&leaf.key(0)?)?;
                self.ctx.stats.inc_leaf_redistributions();
                debug!(
                    target: "arbor::btree",
                    page = leaf.page_id().0,
                    sibling = left.page_id().0,
                    moved = count,
                    "redistributed from left leaf"
                );
                inner.replace_key(parent_path(path), left.page_id(), &separator, leaf.page_id())?;
            }
        } else if let Some(right) = right.as_mut() {
            let count = fill_count(
                (0..right.num_tuples()).map(|i| right.tuple_size(i)),
                right.used_space(),
                leaf.used_space(),
                half,
                total,
            );
            if count == 0 {
                warn!(
                    target: "arbor::btree",
                    page = leaf.page_id().0,
                    "leaf left underfull, no tuple can move"
                );
                return Ok(resume);
            }
            let leaf_len = leaf.num_tuples();
            right.move_tuples_left(&mut leaf, count)?;
            resume = resume
                .map(|s| s.after_move_left(right.page_id(), leaf.page_id(), count, leaf_len));
            let separator = self.ctx.encode_key(&right.key(0)?)?;
            self.ctx.stats.inc_leaf_redistributions();
            debug!(
                target: "arbor::btree",
                page = leaf.page_id().0,
                sibling = right.page_id().0,
                moved = count,
                "redistributed from right leaf"
            );
            inner.replace_key(parent_path(path), leaf.page_id(), &separator, right.page_id())?;
        }
        Ok(resume)
    }
}

/// How many donor entries, taken in `sizes` order, move to an underfull
/// receiver: stop before the receiver overflows or the donor drops below
/// `half`, and as soon as the receiver reaches `half`.
fn fill_count(
    sizes: impl Iterator<Item = usize>,
    mut donor_used: usize,
    mut receiver_used: usize,
    half: usize,
    total: usize,
) -> usize {
    let mut count = 0;
    for size in sizes {
        if receiver_used + size > total || donor_used < half + size {
            break;
        }
        donor_used -= size;
        receiver_used += size;
        count += 1;
        if receiver_used >= half {
            break;
        }
    }
    count
}
