//! Inner page view.
//!
//! ```text
//! 0     kind = Inner
//! 1..3  unused
//! 3..5  pointer count
//! 5..   P0 K0 P1 K1 ... Pn   (u16 page pointers, keys encoded with the key schema)
//! ```
//!
//! Moves between sibling inner pages rotate the separator key held by the
//! parent: the old separator is pulled down between the moved range and the
//! receiving page's existing entries, and the key left at the cut point is
//! handed back as the new separator.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::primitives::pager::PageRef;
use crate::storage::tuple::{compare_partial, decode_tuple, stored_len, Schema, Tuple};
use crate::types::{ArborError, PageId, PageKind, Result};

use super::page::{
    expect_kind, read_page_id, read_u16, shift_region, write_page_id, write_u16, COUNT_OFFSET,
    ENTRIES_OFFSET, KIND_OFFSET, POINTER_LEN,
};

/// How a search key picks a child when it equals a separator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Descend {
    /// Keys equal to `Ki` go right of it, where they are stored.
    Upper,
    /// Keys equal to `Ki` go left of it, reaching the first leaf that may hold
    /// a tuple with that key prefix.
    Lower,
}

/// Decoded view of one inner page.
pub struct InnerPage {
    page: PageRef,
    key_schema: Arc<Schema>,
    pointers: Vec<usize>,
    keys: Vec<usize>,
    end: usize,
}

impl InnerPage {
    /// Wraps an existing inner page.
    pub fn load(page: PageRef, key_schema: Arc<Schema>) -> Result<Self> {
        expect_kind(&page.read(), PageKind::Inner)?;
        let mut inner = Self {
            page,
            key_schema,
            pointers: Vec::new(),
            keys: Vec::new(),
            end: ENTRIES_OFFSET,
        };
        inner.decode()?;
        Ok(inner)
    }

    /// Formats `page` as an inner page with no pointers.
    pub fn init(page: PageRef, key_schema: Arc<Schema>) -> Self {
        {
            let mut buf = page.write();
            buf.fill(0);
            buf[KIND_OFFSET] = PageKind::Inner.as_u8();
        }
        Self {
            page,
            key_schema,
            pointers: Vec::new(),
            keys: Vec::new(),
            end: ENTRIES_OFFSET,
        }
    }

    /// Formats `page` as a root holding `[left, key, right]`.
    pub fn init_root(
        page: PageRef,
        key_schema: Arc<Schema>,
        left: PageId,
        key: &[u8],
        right: PageId,
    ) -> Result<Self> {
        let mut inner = Self::init(page, key_schema);
        {
            let mut buf = inner.page.write();
            let mut pos = ENTRIES_OFFSET;
            write_page_id(&mut buf, pos, left);
            pos += POINTER_LEN;
            buf[pos..pos + key.len()].copy_from_slice(key);
            pos += key.len();
            write_page_id(&mut buf, pos, right);
            write_u16(&mut buf, COUNT_OFFSET, 2);
        }
        inner.decode()?;
        Ok(inner)
    }

    fn decode(&mut self) -> Result<()> {
        let buf = self.page.read();
        let count = usize::from(read_u16(&buf, COUNT_OFFSET));
        self.pointers.clear();
        self.keys.clear();
        let mut pos = ENTRIES_OFFSET;
        for idx in 0..count {
            if pos + POINTER_LEN > buf.len() {
                return Err(ArborError::Corruption("inner page entries exceed page size"));
            }
            self.pointers.push(pos);
            pos += POINTER_LEN;
            if idx + 1 < count {
                self.keys.push(pos);
                pos += stored_len(&self.key_schema, &buf, pos)?;
            }
        }
        self.end = pos;
        Ok(())
    }

    /// Shared page frame.
    pub fn page(&self) -> &PageRef {
        &self.page
    }

    /// Page number.
    pub fn page_id(&self) -> PageId {
        self.page.id()
    }

    /// Number of child pointers.
    pub fn num_pointers(&self) -> usize {
        self.pointers.len()
    }

    /// Number of separator keys.
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Bytes in use, header included.
    pub fn used_space(&self) -> usize {
        self.end
    }

    /// Page size.
    pub fn total_space(&self) -> usize {
        self.page.read().len()
    }

    /// Bytes still available.
    pub fn free_space(&self) -> usize {
        self.total_space() - self.end
    }

    /// Bytes taken by pointers and keys.
    pub fn entry_bytes(&self) -> usize {
        self.end - ENTRIES_OFFSET
    }

    /// Child pointer `idx`.
    pub fn pointer(&self, idx: usize) -> PageId {
        read_page_id(&self.page.read(), self.pointers[idx])
    }

    /// All child pointers in order.
    pub fn pointers(&self) -> Vec<PageId> {
        let buf = self.page.read();
        self.pointers
            .iter()
            .map(|at| read_page_id(&buf, *at))
            .collect()
    }

    /// Position of `child` among the pointers.
    pub fn index_of_pointer(&self, child: PageId) -> Option<usize> {
        self.pointers().iter().position(|p| *p == child)
    }

    /// Stored size of key `idx`.
    pub fn key_size(&self, idx: usize) -> usize {
        self.pointers[idx + 1] - self.keys[idx]
    }

    /// Decodes key `idx`.
    pub fn key(&self, idx: usize) -> Result<Tuple> {
        decode_tuple(&self.key_schema, &self.page.read(), self.keys[idx])
    }

    /// Raw bytes of key `idx`.
    pub fn key_bytes(&self, idx: usize) -> Vec<u8> {
        let start = self.keys[idx];
        self.page.read()[start..start + self.key_size(idx)].to_vec()
    }

    /// Index of the child whose range holds `key`.
    pub fn child_index(&self, key: &Tuple, descend: Descend) -> Result<usize> {
        for idx in 0..self.keys.len() {
            let ord = compare_partial(key, &self.key(idx)?);
            let go_left = match descend {
                Descend::Upper => ord == Ordering::Less,
                Descend::Lower => ord != Ordering::Greater,
            };
            if go_left {
                return Ok(idx);
            }
        }
        Ok(self.pointers.len().saturating_sub(1))
    }

    /// Inserts `key` and `child` immediately after pointer `idx`.
    pub fn insert_after(&mut self, idx: usize, key: &[u8], child: PageId) -> Result<()> {
        let needed = key.len() + POINTER_LEN;
        if needed > self.free_space() {
            return Err(ArborError::Corruption("inner insert without enough free space"));
        }
        let at = self.pointers[idx] + POINTER_LEN;
        {
            let mut buf = self.page.write();
            shift_region(&mut buf, at, self.end, needed as isize);
            buf[at..at + key.len()].copy_from_slice(key);
            write_page_id(&mut buf, at + key.len(), child);
            let count = self.pointers.len() as u16 + 1;
            write_u16(&mut buf, COUNT_OFFSET, count);
        }
        self.decode()
    }

    /// Removes pointer `idx` along with the key on its right or left. With a
    /// single pointer only the pointer is removed.
    pub fn delete_pointer(&mut self, idx: usize, remove_right_key: bool) -> Result<()> {
        let (start, stop) = if self.pointers.len() == 1 {
            (self.pointers[0], self.end)
        } else if remove_right_key {
            if idx + 1 >= self.pointers.len() {
                return Err(ArborError::Corruption("no key right of the last pointer"));
            }
            (self.pointers[idx], self.pointers[idx + 1])
        } else {
            if idx == 0 {
                return Err(ArborError::Corruption("no key left of the first pointer"));
            }
            (self.keys[idx - 1], self.pointers[idx] + POINTER_LEN)
        };
        {
            let mut buf = self.page.write();
            shift_region(&mut buf, stop, self.end, -((stop - start) as isize));
            let count = self.pointers.len() as u16 - 1;
            write_u16(&mut buf, COUNT_OFFSET, count);
        }
        self.decode()
    }

    /// Overwrites key `idx`. Fails when the page cannot absorb the growth.
    pub fn replace_key(&mut self, idx: usize, key: &[u8]) -> Result<()> {
        let old = self.key_size(idx);
        if key.len() > old && key.len() - old > self.free_space() {
            return Err(ArborError::Corruption("inner key replacement overflows page"));
        }
        let start = self.keys[idx];
        {
            let mut buf = self.page.write();
            shift_region(
                &mut buf,
                start + old,
                self.end,
                key.len() as isize - old as isize,
            );
            buf[start..start + key.len()].copy_from_slice(key);
        }
        self.decode()
    }

    /// Returns `(bytes leaving self, bytes arriving at a non-empty receiver)`
    /// when `count` leading pointers move left with a `parent_key`-byte
    /// separator pulled down.
    pub fn left_move_sizes(&self, count: usize, parent_key: usize) -> (usize, usize) {
        let cut = self.pointers[count - 1] + POINTER_LEN;
        let moved = cut - ENTRIES_OFFSET;
        if count == self.pointers.len() {
            (moved, moved + parent_key)
        } else {
            (moved + self.key_size(count - 1), moved + parent_key)
        }
    }

    /// Same as [`InnerPage::left_move_sizes`] for `count` trailing pointers
    /// moving right.
    pub fn right_move_sizes(&self, count: usize, parent_key: usize) -> (usize, usize) {
        let first = self.pointers.len() - count;
        let moved = self.end - self.pointers[first];
        if first == 0 {
            (moved, moved + parent_key)
        } else {
            (moved + self.key_size(first - 1), moved + parent_key)
        }
    }

    /// Moves the first `count` pointers (and the keys between them) to the end
    /// of `left`. `parent_key`, the separator between the two pages, is placed
    /// between `left`'s last pointer and the moved range; it may be `None` only
    /// when `left` is empty. Returns the key that separated the moved range
    /// from the pointers staying behind, which becomes the new parent
    /// separator, or `None` when every pointer moved.
    pub fn move_pointers_left(
        &mut self,
        left: &mut InnerPage,
        count: usize,
        parent_key: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        if count == 0 || count > self.pointers.len() {
            return Err(ArborError::Corruption("inner move count out of range"));
        }
        let cut = self.pointers[count - 1] + POINTER_LEN;
        let moved = self.page.read()[ENTRIES_OFFSET..cut].to_vec();
        let (new_separator, removed_to) = if count < self.pointers.len() {
            let key_start = self.keys[count - 1];
            let key_end = self.pointers[count];
            let key = self.page.read()[key_start..key_end].to_vec();
            (Some(key), key_end)
        } else {
            (None, self.end)
        };
        left.append_range(parent_key, &moved, count)?;
        {
            let mut buf = self.page.write();
            shift_region(
                &mut buf,
                removed_to,
                self.end,
                -((removed_to - ENTRIES_OFFSET) as isize),
            );
            let remaining = (self.pointers.len() - count) as u16;
            write_u16(&mut buf, COUNT_OFFSET, remaining);
        }
        self.decode()?;
        Ok(new_separator)
    }

    /// Moves the last `count` pointers (and the keys between them) to the
    /// front of `right`, placing `parent_key` between the moved range and
    /// `right`'s first pointer. Returns the new parent separator as in
    /// [`InnerPage::move_pointers_left`].
    pub fn move_pointers_right(
        &mut self,
        right: &mut InnerPage,
        count: usize,
        parent_key: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        if count == 0 || count > self.pointers.len() {
            return Err(ArborError::Corruption("inner move count out of range"));
        }
        let first = self.pointers.len() - count;
        let start = self.pointers[first];
        let moved = self.page.read()[start..self.end].to_vec();
        let (new_separator, truncate_at) = if first > 0 {
            let key_start = self.keys[first - 1];
            let key = self.page.read()[key_start..start].to_vec();
            (Some(key), key_start)
        } else {
            (None, ENTRIES_OFFSET)
        };
        right.prepend_range(&moved, parent_key, count)?;
        {
            let mut buf = self.page.write();
            buf[truncate_at..self.end].fill(0);
            write_u16(&mut buf, COUNT_OFFSET, first as u16);
        }
        self.decode()?;
        Ok(new_separator)
    }

    fn append_range(
        &mut self,
        parent_key: Option<&[u8]>,
        moved: &[u8],
        count: usize,
    ) -> Result<()> {
        let separator = self.join_key(parent_key)?;
        let needed = separator.len() + moved.len();
        if needed > self.free_space() {
            return Err(ArborError::Corruption("inner move overflows the receiving page"));
        }
        {
            let mut buf = self.page.write();
            let mut pos = self.end;
            buf[pos..pos + separator.len()].copy_from_slice(separator);
            pos += separator.len();
            buf[pos..pos + moved.len()].copy_from_slice(moved);
            let total = (self.pointers.len() + count) as u16;
            write_u16(&mut buf, COUNT_OFFSET, total);
        }
        self.decode()
    }

    fn prepend_range(
        &mut self,
        moved: &[u8],
        parent_key: Option<&[u8]>,
        count: usize,
    ) -> Result<()> {
        let separator = self.join_key(parent_key)?;
        let needed = separator.len() + moved.len();
        if needed > self.free_space() {
            return Err(ArborError::Corruption("inner move overflows the receiving page"));
        }
        {
            let mut buf = self.page.write();
            shift_region(&mut buf, ENTRIES_OFFSET, self.end, needed as isize);
            buf[ENTRIES_OFFSET..ENTRIES_OFFSET + moved.len()].copy_from_slice(moved);
            let at = ENTRIES_OFFSET + moved.len();
            buf[at..at + separator.len()].copy_from_slice(separator);
            let total = (self.pointers.len() + count) as u16;
            write_u16(&mut buf, COUNT_OFFSET, total);
        }
        self.decode()
    }

    /// The key that goes between existing entries and a moved range.
    fn join_key<'k>(&self, parent_key: Option<&'k [u8]>) -> Result<&'k [u8]> {
        match (self.pointers.is_empty(), parent_key) {
            (true, _) => Ok(&[]),
            (false, Some(key)) => Ok(key),
            (false, None) => Err(ArborError::Corruption(
                "moving pointers into a non-empty page needs the parent key",
            )),
        }
    }
}
