//! Leaf page view.
//!
//! ```text
//! 0     kind = Leaf
//! 1..3  next leaf page (0 = last leaf)
//! 3..5  tuple count
//! 5..   tuples in key order
//! ```

use std::cmp::Ordering;
use std::sync::Arc;

use crate::primitives::pager::PageRef;
use crate::storage::tuple::{compare_tuples, decode_tuple, stored_len, Schema, Tuple};
use crate::types::{ArborError, PageId, PageKind, Result};

use super::page::{
    expect_kind, read_page_id, read_u16, shift_region, write_page_id, write_u16, COUNT_OFFSET,
    ENTRIES_OFFSET, KIND_OFFSET, NEXT_PAGE_OFFSET,
};

/// Decoded view of one leaf page. Tuple offsets are cached and recomputed
/// after every mutation made through the view.
pub struct LeafPage {
    page: PageRef,
    schema: Arc<Schema>,
    offsets: Vec<usize>,
    end: usize,
}

impl LeafPage {
    /// Wraps an existing leaf page.
    pub fn load(page: PageRef, schema: Arc<Schema>) -> Result<Self> {
        expect_kind(&page.read(), PageKind::Leaf)?;
        let mut leaf = Self {
            page,
            schema,
            offsets: Vec::new(),
            end: ENTRIES_OFFSET,
        };
        leaf.decode()?;
        Ok(leaf)
    }

    /// Formats `page` as an empty leaf with no successor.
    pub fn init(page: PageRef, schema: Arc<Schema>) -> Self {
        {
            let mut buf = page.write();
            buf.fill(0);
            buf[KIND_OFFSET] = PageKind::Leaf.as_u8();
        }
        Self {
            page,
            schema,
            offsets: Vec::new(),
            end: ENTRIES_OFFSET,
        }
    }

    fn decode(&mut self) -> Result<()> {
        let buf = self.page.read();
        let count = usize::from(read_u16(&buf, COUNT_OFFSET));
        self.offsets.clear();
        self.offsets.reserve(count);
        let mut pos = ENTRIES_OFFSET;
        for _ in 0..count {
            self.offsets.push(pos);
            pos += stored_len(&self.schema, &buf, pos)?;
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

    /// Next leaf in the chain, or page 0 for the last leaf.
    pub fn next_page(&self) -> PageId {
        read_page_id(&self.page.read(), NEXT_PAGE_OFFSET)
    }

    /// Relinks the leaf chain.
    pub fn set_next_page(&mut self, id: PageId) {
        write_page_id(&mut self.page.write(), NEXT_PAGE_OFFSET, id);
    }

    /// Number of tuples.
    pub fn num_tuples(&self) -> usize {
        self.offsets.len()
    }

    /// Bytes in use, header included.
    pub fn used_space(&self) -> usize {
        self.end
    }

    /// Page size.
    pub fn total_space(&self) -> usize {
        self.page.read().len()
    }

    /// Bytes still available for tuples.
    pub fn free_space(&self) -> usize {
        self.total_space() - self.end
    }

    /// Bytes taken by tuples alone.
    pub fn tuple_bytes(&self) -> usize {
        self.end - ENTRIES_OFFSET
    }

    /// Byte offset of tuple `idx`.
    pub fn tuple_offset(&self, idx: usize) -> usize {
        self.offsets[idx]
    }

    /// Stored size of tuple `idx`.
    pub fn tuple_size(&self, idx: usize) -> usize {
        self.offsets.get(idx + 1).copied().unwrap_or(self.end) - self.offsets[idx]
    }

    /// Index of the tuple starting at `offset`, scanning in offset order and
    /// stopping once offsets pass the target.
    pub fn index_at_offset(&self, offset: usize) -> Option<usize> {
        for (idx, start) in self.offsets.iter().enumerate() {
            match start.cmp(&offset) {
                Ordering::Less => continue,
                Ordering::Equal => return Some(idx),
                Ordering::Greater => return None,
            }
        }
        None
    }

    /// Decodes tuple `idx`.
    pub fn tuple(&self, idx: usize) -> Result<Tuple> {
        decode_tuple(&self.schema, &self.page.read(), self.offsets[idx])
    }

    /// Key columns of tuple `idx`.
    pub fn key(&self, idx: usize) -> Result<Tuple> {
        Ok(self.tuple(idx)?.prefix(self.schema.key_columns()))
    }

    /// Raw bytes of tuple `idx`.
    pub fn tuple_bytes_at(&self, idx: usize) -> Vec<u8> {
        let start = self.offsets[idx];
        self.page.read()[start..start + self.tuple_size(idx)].to_vec()
    }

    /// Binary search over the key columns. Returns the index of the first tuple
    /// not less than `key` and whether that tuple's key equals it.
    pub fn search(&self, key: &Tuple) -> Result<(usize, bool)> {
        let columns = self.schema.key_columns();
        let (mut lo, mut hi) = (0, self.offsets.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            match compare_tuples(&self.tuple(mid)?, key, columns) {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        let found = lo < self.offsets.len()
            && compare_tuples(&self.tuple(lo)?, key, columns) == Ordering::Equal;
        Ok((lo, found))
    }

    /// Inserts already encoded tuple bytes so they become tuple `idx`.
    pub fn insert_at(&mut self, idx: usize, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.free_space() {
            return Err(ArborError::Corruption("leaf insert without enough free space"));
        }
        let at = self.offsets.get(idx).copied().unwrap_or(self.end);
        {
            let mut buf = self.page.write();
            shift_region(&mut buf, at, self.end, bytes.len() as isize);
            buf[at..at + bytes.len()].copy_from_slice(bytes);
            let count = self.offsets.len() as u16 + 1;
            write_u16(&mut buf, COUNT_OFFSET, count);
        }
        self.decode()
    }

    /// Removes tuple `idx`, closing the gap.
    pub fn delete_at(&mut self, idx: usize) -> Result<()> {
        let start = self.offsets[idx];
        let size = self.tuple_size(idx);
        {
            let mut buf = self.page.write();
            shift_region(&mut buf, start + size, self.end, -(size as isize));
            let count = self.offsets.len() as u16 - 1;
            write_u16(&mut buf, COUNT_OFFSET, count);
        }
        self.decode()
    }

    /// Moves the first `count` tuples to the end of `left`, which must be this
    /// leaf's predecessor in the chain.
    pub fn move_tuples_left(&mut self, left: &mut LeafPage, count: usize) -> Result<()> {
        if left.next_page() != self.page_id() {
            return Err(ArborError::Corruption("left leaf is not the chain predecessor"));
        }
        if count == 0 {
            return Ok(());
        }
        let cut = self.offsets.get(count).copied().unwrap_or(self.end);
        let moved = self.page.read()[ENTRIES_OFFSET..cut].to_vec();
        left.append(&moved, count)?;
        {
            let mut buf = self.page.write();
            shift_region(&mut buf, cut, self.end, -((cut - ENTRIES_OFFSET) as isize));
            let remaining = (self.offsets.len() - count) as u16;
            write_u16(&mut buf, COUNT_OFFSET, remaining);
        }
        self.decode()
    }

    /// Moves the last `count` tuples to the front of `right`, which must be this
    /// leaf's successor in the chain.
    pub fn move_tuples_right(&mut self, right: &mut LeafPage, count: usize) -> Result<()> {
        if self.next_page() != right.page_id() {
            return Err(ArborError::Corruption("right leaf is not the chain successor"));
        }
        if count == 0 {
            return Ok(());
        }
        let keep = self.offsets.len() - count;
        let cut = self.offsets[keep];
        let moved = self.page.read()[cut..self.end].to_vec();
        right.prepend(&moved, count)?;
        {
            let mut buf = self.page.write();
            buf[cut..self.end].fill(0);
            write_u16(&mut buf, COUNT_OFFSET, keep as u16);
        }
        self.decode()
    }

    fn append(&mut self, bytes: &[u8], count: usize) -> Result<()> {
        if bytes.len() > self.free_space() {
            return Err(ArborError::Corruption("leaf move overflows the receiving page"));
        }
        {
            let mut buf = self.page.write();
            buf[self.end..self.end + bytes.len()].copy_from_slice(bytes);
            let total = (self.offsets.len() + count) as u16;
            write_u16(&mut buf, COUNT_OFFSET, total);
        }
        self.decode()
    }

    fn prepend(&mut self, bytes: &[u8], count: usize) -> Result<()> {
        if bytes.len() > self.free_space() {
            return Err(ArborError::Corruption("leaf move overflows the receiving page"));
        }
        {
            let mut buf = self.page.write();
            shift_region(&mut buf, ENTRIES_OFFSET, self.end, bytes.len() as isize);
            buf[ENTRIES_OFFSET..ENTRIES_OFFSET + bytes.len()].copy_from_slice(bytes);
            let total = (self.offsets.len() + count) as u16;
            write_u16(&mut buf, COUNT_OFFSET, total);
        }
        self.decode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::{MemPager, PageStore};
    use crate::storage::tuple::{encode_tuple, Column, ColumnType, Value};
    use crate::types::FileType;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(
                vec![
                    Column::new("id", ColumnType::Integer),
                    Column::new("note", ColumnType::VarChar(16)),
                ],
                1,
            )
            .expect("schema"),
        )
    }

    fn row(schema: &Schema, id: i32, note: &str) -> Vec<u8> {
        let tuple = Tuple::new(vec![Value::Integer(id), Value::Str(note.into())]);
        encode_tuple(schema, &tuple).expect("encode")
    }

    fn ids(leaf: &LeafPage) -> Vec<i32> {
        (0..leaf.num_tuples())
            .map(|i| match leaf.tuple(i).expect("tuple").get(0) {
                Some(Value::Integer(v)) => *v,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    fn key(id: i32) -> Tuple {
        Tuple::new(vec![Value::Integer(id)])
    }

    #[test]
    fn inserts_keep_offsets_in_sync() -> Result<()> {
        let store = MemPager::create(FileType::BTreeTupleFile, 512)?;
        let schema = schema();
        let mut leaf = LeafPage::init(store.allocate_page()?, schema.clone());
        for (id, note) in [(20, "b"), (10, "a"), (30, "ccc")] {
            let (idx, found) = leaf.search(&key(id))?;
            assert!(!found);
            leaf.insert_at(idx, &row(&schema, id, note))?;
        }
        assert_eq!(ids(&leaf), vec![10, 20, 30]);
        assert_eq!(leaf.search(&key(20))?, (1, true));
        assert_eq!(leaf.search(&key(25))?, (2, false));
        assert_eq!(leaf.tuple_offset(1), ENTRIES_OFFSET + leaf.tuple_size(0));
        assert_eq!(leaf.index_at_offset(leaf.tuple_offset(2)), Some(2));
        assert_eq!(leaf.index_at_offset(leaf.tuple_offset(2) - 1), None);

        let reloaded = LeafPage::load(leaf.page().clone(), schema)?;
        assert_eq!(reloaded.used_space(), leaf.used_space());

        leaf.delete_at(0)?;
        assert_eq!(ids(&leaf), vec![20, 30]);
        assert_eq!(leaf.tuple_offset(0), ENTRIES_OFFSET);
        Ok(())
    }

    #[test]
    fn moves_between_chained_leaves() -> Result<()> {
        let store = MemPager::create(FileType::BTreeTupleFile, 512)?;
        let schema = schema();
        let mut left = LeafPage::init(store.allocate_page()?, schema.clone());
        let mut right = LeafPage::init(store.allocate_page()?, schema.clone());
        left.set_next_page(right.page_id());
        for id in 1..=4 {
            left.insert_at(left.num_tuples(), &row(&schema, id, "x"))?;
        }
        for id in 5..=6 {
            right.insert_at(right.num_tuples(), &row(&schema, id, "yy"))?;
        }

        left.move_tuples_right(&mut right, 2)?;
        assert_eq!(ids(&left), vec![1, 2]);
        assert_eq!(ids(&right), vec![3, 4, 5, 6]);

        right.move_tuples_left(&mut left, 3)?;
        assert_eq!(ids(&left), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(&right), vec![6]);

        assert!(left.move_tuples_left(&mut right, 1).is_err());
        Ok(())
    }

    #[test]
    fn rejects_non_leaf_pages() -> Result<()> {
        let store = MemPager::create(FileType::BTreeTupleFile, 512)?;
        let page = store.allocate_page()?;
        page.write()[KIND_OFFSET] = PageKind::Inner.as_u8();
        assert!(matches!(
            LeafPage::load(page, schema()),
            Err(ArborError::Corruption(_))
        ));
        Ok(())
    }
}
