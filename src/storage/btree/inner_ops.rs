//! Inner-node maintenance. Pages hold no parent pointers, so every operation
//! takes the root-to-node path of the page it changes.

use tracing::{debug, warn};

use crate::types::{ArborError, PageId, Result};

use super::context::TreeContext;
use super::inner::InnerPage;
use super::leaf_ops::parent_path;
use super::page::{ENTRIES_OFFSET, POINTER_LEN};

pub(crate) struct InnerRebalancer<'a> {
    ctx: &'a TreeContext,
}

/// A same-parent sibling and the parent separator between it and the page
/// being changed.
struct Neighbour {
    page: InnerPage,
    separator: Vec<u8>,
}

impl<'a> InnerRebalancer<'a> {
    pub fn new(ctx: &'a TreeContext) -> Self {
        Self { ctx }
    }

    fn node(path: &[PageId]) -> Result<PageId> {
        path.last()
            .copied()
            .ok_or(ArborError::Corruption("empty page path"))
    }

    /// Loads the left and right same-parent siblings of the page at the end of
    /// `path`.
    fn neighbours(&self, path: &[PageId]) -> Result<(Option<Neighbour>, Option<Neighbour>)> {
        let [.., parent, node] = path else {
            return Ok((None, None));
        };
        let parent = self.ctx.load_inner(*parent)?;
        let idx = parent
            .index_of_pointer(*node)
            .ok_or(ArborError::Corruption("page path does not match parent pointers"))?;
        let left = match idx.checked_sub(1) {
            Some(i) => Some(Neighbour {
                page: self.ctx.load_inner(parent.pointer(i))?,
                separator: parent.key_bytes(i),
            }),
            None => None,
        };
        let right = if idx + 1 < parent.num_pointers() {
            Some(Neighbour {
                page: self.ctx.load_inner(parent.pointer(idx + 1))?,
                separator: parent.key_bytes(idx),
            })
        } else {
            None
        };
        Ok((left, right))
    }

    /// Inserts `key` and `right` immediately after the pointer to `left` in the
    /// page at the end of `path`, relocating or splitting as needed.
    pub fn add_entry(
        &self,
        path: &[PageId],
        left: PageId,
        key: &[u8],
        right: PageId,
    ) -> Result<()> {
        let mut page = self.ctx.load_inner(Self::node(path)?)?;
        let idx = page
            .index_of_pointer(left)
            .ok_or(ArborError::Corruption("split page missing from its parent"))?;
        let needed = key.len() + POINTER_LEN;
        if needed <= page.free_space() {
            return page.insert_after(idx, key, right);
        }

        let (left_sibling, right_sibling) = self.neighbours(path)?;
        if let Some(mut sibling) = left_sibling {
            if self.relocate_left(&mut sibling, &mut page, path, idx, key, right)? {
                return Ok(());
            }
        }
        if let Some(mut sibling) = right_sibling {
            if self.relocate_right(&mut page, &mut sibling, path, idx, key, right)? {
                return Ok(());
            }
        }
        self.split(page, path, idx, key, right)
    }

    fn relocate_left(
        &self,
        left: &mut Neighbour,
        page: &mut InnerPage,
        path: &[PageId],
        idx: usize,
        key: &[u8],
        child: PageId,
    ) -> Result<bool> {
        let needed = key.len() + POINTER_LEN;
        let n = page.num_pointers();
        let separator_len = left.separator.len();
        let count = (1..n.saturating_sub(1)).find(|&c| {
            let (out, arrive) = page.left_move_sizes(c, separator_len);
            if idx < c {
                left.page.free_space() >= arrive + needed
            } else {
                left.page.free_space() >= arrive && page.free_space() + out >= needed
            }
        });
        let Some(count) = count else {
            return Ok(false);
        };

        let left_len = left.page.num_pointers();
        let separator = page
            .move_pointers_left(&mut left.page, count, Some(&left.separator))?
            .ok_or(ArborError::Corruption("relocation emptied an inner page"))?;
        if idx < count {
            left.page.insert_after(left_len + idx, key, child)?;
        } else {
            page.insert_after(idx - count, key, child)?;
        }
        self.ctx.stats.inc_inner_relocations();
        debug!(
            target: "arbor::btree",
            page = page.page_id().0,
            sibling = left.page.page_id().0,
            moved = count,
            "relocated entries to left inner page"
        );
        self.replace_key(parent_path(path), left.page.page_id(), &separator, page.page_id())?;
        Ok(true)
    }

    fn relocate_right(
        &self,
        page: &mut InnerPage,
        right: &mut Neighbour,
        path: &[PageId],
        idx: usize,
        key: &[u8],
        child: PageId,
    ) -> Result<bool> {
        let needed = key.len() + POINTER_LEN;
        let n = page.num_pointers();
        let separator_len = right.separator.len();
        let count = (1..n.saturating_sub(1)).find(|&c| {
            let (out, arrive) = page.right_move_sizes(c, separator_len);
            if idx >= n - c {
                right.page.free_space() >= arrive + needed
            } else {
                right.page.free_space() >= arrive && page.free_space() + out >= needed
            }
        });
        let Some(count) = count else {
            return Ok(false);
        };

        let first = n - count;
        let separator = page
            .move_pointers_right(&mut right.page, count, Some(&right.separator))?
            .ok_or(ArborError::Corruption("relocation emptied an inner page"))?;
        if idx >= first {
            right.page.insert_after(idx - first, key, child)?;
        } else {
            page.insert_after(idx, key, child)?;
        }
        self.ctx.stats.inc_inner_relocations();
        debug!(
            target: "arbor::btree",
            page = page.page_id().0,
            sibling = right.page.page_id().0,
            moved = count,
            "relocated entries to right inner page"
        );
        self.replace_key(parent_path(path), page.page_id(), &separator, right.page.page_id())?;
        Ok(true)
    }

    /// Splits `page` by pointer count, moving to a byte-balanced point only when
    /// the new entry would not fit in its half.
    fn split(
        &self,
        mut page: InnerPage,
        path: &[PageId],
        idx: usize,
        key: &[u8],
        child: PageId,
    ) -> Result<()> {
        let n = page.num_pointers();
        let needed = key.len() + POINTER_LEN;
        let total = page.total_space();
        let used = page.used_space();

        // Sizes of both halves, new entry included, when the last `m` pointers
        // move to the new page. `None` when a half would overflow or end up
        // with fewer than `min_side` pointers.
        let layout = |m: usize, min_side: usize| -> Option<(usize, usize)> {
            let first = n - m;
            let (out, arrive) = page.right_move_sizes(m, 0);
            let (mut lower, mut upper) = (used - out, ENTRIES_OFFSET + arrive);
            let (mut lower_ptrs, mut upper_ptrs) = (first, m);
            if idx >= first {
                upper += needed;
                upper_ptrs += 1;
            } else {
                lower += needed;
                lower_ptrs += 1;
            }
            (lower <= total && upper <= total && lower_ptrs >= min_side && upper_ptrs >= min_side)
                .then_some((lower, upper))
        };
        let balanced = |min_side: usize| {
            (1..n)
                .filter_map(|m| layout(m, min_side).map(|(l, u)| (m, l.abs_diff(u))))
                .min_by_key(|(_, diff)| *diff)
                .map(|(m, _)| m)
        };
        let by_count = n / 2;
        let moving = if by_count >= 1 && layout(by_count, 2).is_some() {
            Some(by_count)
        } else {
            balanced(2).or_else(|| balanced(1))
        }
        .ok_or(ArborError::Corruption("inner page has no feasible split point"))?;

        let fresh_page = self.ctx.allocator().allocate()?;
        let mut fresh = InnerPage::init(fresh_page, self.ctx.key_schema.clone());
        let first = n - moving;
        let promoted = page
            .move_pointers_right(&mut fresh, moving, None)?
            .ok_or(ArborError::Corruption("inner split moved every pointer"))?;
        if idx >= first {
            fresh.insert_after(idx - first, key, child)?;
        } else {
            page.insert_after(idx, key, child)?;
        }
        self.ctx.stats.inc_inner_splits();
        debug!(
            target: "arbor::btree",
            page = page.page_id().0,
            new_page = fresh.page_id().0,
            left = page.num_pointers(),
            right = fresh.num_pointers(),
            "split inner page"
        );

        if path.len() <= 1 {
            let root_page = self.ctx.allocator().allocate()?;
            let root = InnerPage::init_root(
                root_page,
                self.ctx.key_schema.clone(),
                page.page_id(),
                &promoted,
                fresh.page_id(),
            )?;
            self.ctx.header()?.set_root(root.page_id());
            self.ctx.stats.inc_root_splits();
            debug!(
                target: "arbor::btree",
                root = root.page_id().0,
                "new root above split inner page"
            );
            Ok(())
        } else {
            self.add_entry(parent_path(path), page.page_id(), &promoted, fresh.page_id())
        }
    }

    /// Sets the separator between `left` and `right` in the page at the end of
    /// `path`. A key too large for the page is re-inserted as a new entry.
    pub fn replace_key(
        &self,
        path: &[PageId],
        left: PageId,
        key: &[u8],
        right: PageId,
    ) -> Result<()> {
        let mut page = self.ctx.load_inner(Self::node(path)?)?;
        let idx = page
            .index_of_pointer(left)
            .ok_or(ArborError::Corruption("separator owner missing from parent"))?;
        if idx + 1 >= page.num_pointers() || page.pointer(idx + 1) != right {
            return Err(ArborError::Corruption("siblings are not adjacent in their parent"));
        }
        let old = page.key_size(idx);
        if key.len() <= old + page.free_space() {
            return page.replace_key(idx, key);
        }
        debug!(
            target: "arbor::btree",
            page = page.page_id().0,
            "separator outgrew page, re-adding entry"
        );
        page.delete_pointer(idx + 1, false)?;
        drop(page);
        self.add_entry(path, left, key, right)
    }

    /// Removes the pointer to `child` from the page at the end of `path`,
    /// together with the key on its right (`remove_right_key`) or left, then
    /// collapses, coalesces or refills the page.
    pub fn delete_pointer(
        &self,
        path: &[PageId],
        child: PageId,
        remove_right_key: bool,
    ) -> Result<()> {
        let mut page = self.ctx.load_inner(Self::node(path)?)?;
        let idx = page
            .index_of_pointer(child)
            .ok_or(ArborError::Corruption("released page missing from its parent"))?;
        page.delete_pointer(idx, remove_right_key)?;

        if path.len() <= 1 {
            if page.num_pointers() == 1 {
                let new_root = page.pointer(0);
                self.ctx.header()?.set_root(new_root);
                self.ctx.allocator().release(page.page())?;
                self.ctx.stats.inc_root_collapses();
                debug!(
                    target: "arbor::btree",
                    old_root = page.page_id().0,
                    root = new_root.0,
                    "collapsed root"
                );
            }
            return Ok(());
        }
        let half = self.ctx.half_full();
        if page.used_space() >= half {
            return Ok(());
        }

        let total = page.total_space();
        let parent = parent_path(path);
        let (left, right) = self.neighbours(path)?;

        if let Some(mut left) = left {
            if left.page.used_space() + left.separator.len() + page.entry_bytes() <= total {
                let n = page.num_pointers();
                page.move_pointers_left(&mut left.page, n, Some(&left.separator))?;
                self.ctx.allocator().release(page.page())?;
                self.ctx.stats.inc_inner_coalesces();
                debug!(
                    target: "arbor::btree",
                    page = page.page_id().0,
                    sibling = left.page.page_id().0,
                    "coalesced inner page into left sibling"
                );
                return self.delete_pointer(parent, page.page_id(), false);
            }
            if let Some(mut right) = right {
                if right.page.used_space() + right.separator.len() + page.entry_bytes() <= total {
                    return self.coalesce_right(page, &mut right, parent);
                }
                return if left.page.used_space() >= right.page.used_space() {
                    self.refill_from_left(&mut page, &mut left, parent)
                } else {
                    self.refill_from_right(&mut page, &mut right, parent)
                };
            }
            return self.refill_from_left(&mut page, &mut left, parent);
        }
        match right {
            Some(mut right) => {
                if right.page.used_space() + right.separator.len() + page.entry_bytes() <= total {
                    self.coalesce_right(page, &mut right, parent)
                } else {
                    self.refill_from_right(&mut page, &mut right, parent)
                }
            }
            None => Err(ArborError::Corruption("non-root inner page without siblings")),
        }
    }

    fn coalesce_right(
        &self,
        mut page: InnerPage,
        right: &mut Neighbour,
        parent: &[PageId],
    ) -> Result<()> {
        let n = page.num_pointers();
        page.move_pointers_right(&mut right.page, n, Some(&right.separator))?;
        self.ctx.allocator().release(page.page())?;
        self.ctx.stats.inc_inner_coalesces();
        debug!(
            target: "arbor::btree",
            page = page.page_id().0,
            sibling = right.page.page_id().0,
            "coalesced inner page into right sibling"
        );
        self.delete_pointer(parent, page.page_id(), true)
    }

    /// Smallest number of donor pointers that brings the receiver to half
    /// fill, never dropping the donor below half or under two pointers.
    fn refill_count(
        &self,
        donor: &InnerPage,
        receiver: &InnerPage,
        sizes: impl Fn(usize) -> (usize, usize),
    ) -> usize {
        let half = self.ctx.half_full();
        let total = receiver.total_space();
        let mut count = 0;
        for c in 1..donor.num_pointers().saturating_sub(1) {
            let (out, arrive) = sizes(c);
            if receiver.used_space() + arrive > total || donor.used_space() < half + out {
                break;
            }
            count = c;
            if receiver.used_space() + arrive >= half {
                break;
            }
        }
        count
    }

    fn refill_from_left(
        &self,
        page: &mut InnerPage,
        left: &mut Neighbour,
        parent: &[PageId],
    ) -> Result<()> {
        let separator_len = left.separator.len();
        let count = self.refill_count(&left.page, page, |c| {
            left.page.right_move_sizes(c, separator_len)
        });
        if count == 0 {
            warn!(
                target: "arbor::btree",
                page = page.page_id().0,
                "inner page left underfull, no entry can move"
            );
            return Ok(());
        }
        let separator = left
            .page
            .move_pointers_right(page, count, Some(&left.separator))?
            .ok_or(ArborError::Corruption("redistribution emptied an inner page"))?;
        self.ctx.stats.inc_inner_redistributions();
        debug!(
            target: "arbor::btree",
            page = page.page_id().0,
            sibling = left.page.page_id().0,
            moved = count,
            "redistributed from left inner page"
        );
        self.replace_key(parent, left.page.page_id(), &separator, page.page_id())
    }

    fn refill_from_right(
        &self,
        page: &mut InnerPage,
        right: &mut Neighbour,
        parent: &[PageId],
    ) -> Result<()> {
        let separator_len = right.separator.len();
        let count = self.refill_count(&right.page, page, |c| {
            right.page.left_move_sizes(c, separator_len)
        });
        if count == 0 {
            warn!(
                target: "arbor::btree",
                page = page.page_id().0,
                "inner page left underfull, no entry can move"
            );
            return Ok(());
        }
        let separator = right
            .page
            .move_pointers_left(page, count, Some(&right.separator))?
            .ok_or(ArborError::Corruption("redistribution emptied an inner page"))?;
        self.ctx.stats.inc_inner_redistributions();
        debug!(
            target: "arbor::btree",
            page = page.page_id().0,
            sibling = right.page.page_id().0,
            moved = count,
            "redistributed from right inner page"
        );
        self.replace_key(parent, page.page_id(), &separator, right.page.page_id())
    }
}
