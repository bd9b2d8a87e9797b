//! Page 0 of a tree file.
//!
//! ```text
//! 0      file-type tag
//! 1      page-size exponent
//! 2..4   root page (0 = empty tree)
//! 4..6   first leaf page (0 = no leaves)
//! 6..8   first empty page (0 = free list empty)
//! 8..10  schema blob length
//! 10..12 statistics blob length
//! 12..   schema blob, then statistics blob
//! ```

use crate::primitives::pager::{PageRef, PageStore, FILE_TYPE_OFFSET};
use crate::types::{ArborError, FileType, PageId, Result};

use super::page::{read_page_id, read_u16, write_page_id, write_u16};

const ROOT_PAGE_OFFSET: usize = 2;
const FIRST_LEAF_OFFSET: usize = 4;
const FIRST_EMPTY_OFFSET: usize = 6;
const SCHEMA_LEN_OFFSET: usize = 8;
const STATS_LEN_OFFSET: usize = 10;
const BLOBS_OFFSET: usize = 12;

/// View over the header page.
pub struct TreeHeader {
    page: PageRef,
}

impl TreeHeader {
    /// Loads page 0 and checks that the file holds a tree.
    pub fn load(store: &dyn PageStore) -> Result<Self> {
        let page = store.load_page(PageId::HEADER)?;
        if FileType::try_from(page.read()[FILE_TYPE_OFFSET])? != FileType::BTreeTupleFile {
            return Err(ArborError::Invalid("file is not a B+ tree tuple file"));
        }
        Ok(Self { page })
    }

    /// Resets the tree pointers and stores `schema` with no statistics.
    pub fn format(&self, schema: &[u8]) -> Result<()> {
        self.set_root(PageId(0));
        self.set_first_leaf(PageId(0));
        self.set_free_list_head(PageId(0));
        self.write_blobs(schema, &[])
    }

    /// Root page, or page 0 for an empty tree.
    pub fn root(&self) -> PageId {
        read_page_id(&self.page.read(), ROOT_PAGE_OFFSET)
    }

    /// Records a new root.
    pub fn set_root(&self, id: PageId) {
        write_page_id(&mut self.page.write(), ROOT_PAGE_OFFSET, id);
    }

    /// Leftmost leaf, where sequential scans start.
    pub fn first_leaf(&self) -> PageId {
        read_page_id(&self.page.read(), FIRST_LEAF_OFFSET)
    }

    /// Records a new leftmost leaf.
    pub fn set_first_leaf(&self, id: PageId) {
        write_page_id(&mut self.page.write(), FIRST_LEAF_OFFSET, id);
    }

    /// Head of the free-page list.
    pub fn free_list_head(&self) -> PageId {
        read_page_id(&self.page.read(), FIRST_EMPTY_OFFSET)
    }

    /// Records a new free-list head.
    pub fn set_free_list_head(&self, id: PageId) {
        write_page_id(&mut self.page.write(), FIRST_EMPTY_OFFSET, id);
    }

    fn blob_lens(&self) -> (usize, usize) {
        let buf = self.page.read();
        (
            usize::from(read_u16(&buf, SCHEMA_LEN_OFFSET)),
            usize::from(read_u16(&buf, STATS_LEN_OFFSET)),
        )
    }

    fn blob(&self, start: usize, len: usize) -> Result<Vec<u8>> {
        let buf = self.page.read();
        buf.get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or(ArborError::Corruption("header blob extends past page end"))
    }

    /// Serialized schema.
    pub fn schema_bytes(&self) -> Result<Vec<u8>> {
        let (schema_len, _) = self.blob_lens();
        self.blob(BLOBS_OFFSET, schema_len)
    }

    /// Serialized table statistics; empty when never analyzed.
    pub fn stats_bytes(&self) -> Result<Vec<u8>> {
        let (schema_len, stats_len) = self.blob_lens();
        self.blob(BLOBS_OFFSET + schema_len, stats_len)
    }

    /// Replaces the statistics blob, keeping the schema.
    pub fn write_stats(&self, stats: &[u8]) -> Result<()> {
        let schema = self.schema_bytes()?;
        self.write_blobs(&schema, stats)
    }

    fn write_blobs(&self, schema: &[u8], stats: &[u8]) -> Result<()> {
        let mut buf = self.page.write();
        let end = BLOBS_OFFSET + schema.len() + stats.len();
        if end > buf.len() {
            return Err(ArborError::Invalid(
                "schema and statistics do not fit in the header page",
            ));
        }
        write_u16(&mut buf, SCHEMA_LEN_OFFSET, schema.len() as u16);
        write_u16(&mut buf, STATS_LEN_OFFSET, stats.len() as u16);
        buf[BLOBS_OFFSET..BLOBS_OFFSET + schema.len()].copy_from_slice(schema);
        buf[BLOBS_OFFSET + schema.len()..end].copy_from_slice(stats);
        buf[end..].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::MemPager;

    #[test]
    fn pointers_and_blobs_live_at_fixed_offsets() -> Result<()> {
        let store = MemPager::create(FileType::BTreeTupleFile, 512)?;
        let header = TreeHeader::load(&store)?;
        header.format(b"schema")?;
        header.set_root(PageId(3));
        header.set_first_leaf(PageId(4));
        header.set_free_list_head(PageId(0x0102));
        header.write_stats(b"st")?;

        let page = store.load_page(PageId::HEADER)?;
        let buf = page.read();
        assert_eq!(&buf[0..2], &[2, 9]);
        assert_eq!(&buf[2..12], &[0, 3, 0, 4, 1, 2, 0, 6, 0, 2]);
        assert_eq!(&buf[12..20], b"schemast");
        drop(buf);
        assert_eq!(header.schema_bytes()?, b"schema");
        assert_eq!(header.stats_bytes()?, b"st");
        Ok(())
    }

    #[test]
    fn oversized_blobs_are_rejected() -> Result<()> {
        let store = MemPager::create(FileType::BTreeTupleFile, 512)?;
        let header = TreeHeader::load(&store)?;
        assert!(header.format(&[7u8; 501]).is_err());
        header.format(&[7u8; 500])?;
        Ok(())
    }

    #[test]
    fn heap_files_are_refused() -> Result<()> {
        let store = MemPager::create(FileType::HeapTupleFile, 512)?;
        assert!(matches!(
            TreeHeader::load(&store),
            Err(ArborError::Invalid(_))
        ));
        Ok(())
    }
}
