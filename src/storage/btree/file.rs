use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::primitives::pager::PageStore;
use crate::storage::tuple::{compare_partial, compare_tuples, encode_tuple, Schema, Tuple};
use crate::types::{ArborError, FilePointer, FileType, PageId, PageKind, Result};

use super::analyze::{self, TableStats};
use super::context::{BTreeOptions, TreeContext};
use super::cursor::{CursorState, SlotPosition, TupleCursor};
use super::header::TreeHeader;
use super::inner::Descend;
use super::leaf::LeafPage;
use super::leaf_ops::LeafRebalancer;
use super::nav::TreeNavigator;
use super::page::{max_tuple_len, page_kind};
use super::stats::BTreeStats;
use super::verify::{self, VerifyReport};

/// Header fields of a tree file.
#[derive(Clone, Debug, Serialize)]
pub struct TreeInfo {
    /// Page size in bytes.
    pub page_size: usize,
    /// Pages in the file, header included.
    pub num_pages: u32,
    /// Root page, 0 for an empty tree.
    pub root: u16,
    /// Leftmost leaf, 0 for an empty tree.
    pub first_leaf: u16,
    /// First page of the free list, 0 when it is empty.
    pub free_list_head: u16,
    /// Largest encoded tuple the file accepts.
    pub max_tuple_len: usize,
    /// Schema rendered as `name type, ...`.
    pub schema: String,
    /// Leading columns forming the key.
    pub key_columns: usize,
}

/// A B+ tree tuple file: ordered, unique-keyed tuples in a page store.
///
/// Readers take `&self`; inserts and deletes take `&mut self`, so a single
/// writer is enforced by the borrow checker.
pub struct BTreeFile {
    ctx: TreeContext,
}

impl BTreeFile {
    /// Formats an empty store as a tree with `schema`.
    pub fn create(
        store: Arc<dyn PageStore>,
        schema: Schema,
        options: BTreeOptions,
    ) -> Result<Self> {
        if store.file_type() != FileType::BTreeTupleFile {
            return Err(ArborError::Invalid("store is not tagged as a B+ tree tuple file"));
        }
        if store.num_pages() != 1 {
            return Err(ArborError::Invalid("tree files must be created on an empty store"));
        }
        let ctx = TreeContext::new(store, schema, options);
        ctx.header()?.format(&ctx.schema.to_bytes())?;
        info!(
            target: "arbor::btree",
            page_size = ctx.page_size(),
            columns = ctx.schema.len(),
            key_columns = ctx.schema.key_columns(),
            "created tree file"
        );
        Ok(Self { ctx })
    }

    /// Opens an existing tree, reading the schema back from the header.
    pub fn open(store: Arc<dyn PageStore>, options: BTreeOptions) -> Result<Self> {
        if store.file_type() != FileType::BTreeTupleFile {
            return Err(ArborError::Invalid("store is not tagged as a B+ tree tuple file"));
        }
        let schema = {
            let header = TreeHeader::load(store.as_ref())?;
            Schema::from_bytes(&header.schema_bytes()?)?
        };
        debug!(target: "arbor::btree", pages = store.num_pages(), "opened tree file");
        Ok(Self {
            ctx: TreeContext::new(store, schema, options),
        })
    }

    /// Row schema.
    pub fn schema(&self) -> &Schema {
        &self.ctx.schema
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.ctx.page_size()
    }

    /// Largest encoded tuple accepted by [`BTreeFile::insert`].
    pub fn max_tuple_len(&self) -> usize {
        max_tuple_len(self.ctx.page_size())
    }

    /// Underlying page store.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.ctx.store
    }

    /// Maintenance counters since the file was opened.
    pub fn stats(&self) -> &BTreeStats {
        &self.ctx.stats
    }

    /// Header fields.
    pub fn info(&self) -> Result<TreeInfo> {
        let header = self.ctx.header()?;
        Ok(TreeInfo {
            page_size: self.ctx.page_size(),
            num_pages: self.ctx.store.num_pages(),
            root: header.root().0,
            first_leaf: header.first_leaf().0,
            free_list_head: header.free_list_head().0,
            max_tuple_len: self.max_tuple_len(),
            schema: self.ctx.schema.to_string(),
            key_columns: self.ctx.schema.key_columns(),
        })
    }

    /// Writes dirty pages back to storage.
    pub fn flush(&self) -> Result<()> {
        self.ctx.store.flush()
    }

    fn navigator(&self) -> TreeNavigator<'_> {
        TreeNavigator::new(&self.ctx)
    }

    fn key_of(&self, tuple: &Tuple) -> Tuple {
        tuple.prefix(self.ctx.schema.key_columns())
    }

    fn cursor_at(&self, leaf: &LeafPage, idx: usize) -> Result<TupleCursor> {
        Ok(TupleCursor::live(
            leaf.tuple(idx)?,
            SlotPosition::new(leaf.page_id(), idx),
            leaf.tuple_offset(idx),
        ))
    }

    /// The leaf at `id`, or `None` when the page is outside the file or no
    /// longer a leaf.
    fn leaf_if_live(&self, id: PageId) -> Result<Option<LeafPage>> {
        if id.is_null() || u32::from(id.0) >= self.ctx.store.num_pages() {
            return Ok(None);
        }
        let page = self.ctx.store.load_page(id)?;
        if page_kind(&page.read()).ok() != Some(PageKind::Leaf) {
            return Ok(None);
        }
        LeafPage::load(page, self.ctx.schema.clone()).map(Some)
    }

    /// First tuple at or after `slot`, following the leaf chain.
    fn first_from(&self, mut slot: SlotPosition) -> Result<Option<TupleCursor>> {
        let mut hops = 0u32;
        loop {
            let leaf = self.ctx.load_leaf(slot.page)?;
            if slot.index < leaf.num_tuples() {
                return self.cursor_at(&leaf, slot.index).map(Some);
            }
            let next = leaf.next_page();
            if next.is_null() {
                return Ok(None);
            }
            hops += 1;
            if hops > self.ctx.store.num_pages() {
                return Err(ArborError::Corruption("leaf chain contains a cycle"));
            }
            slot = SlotPosition::new(next, 0);
        }
    }

    /// First tuple in key order.
    pub fn get_first(&self) -> Result<Option<TupleCursor>> {
        let first = self.ctx.header()?.first_leaf();
        if first.is_null() {
            return Ok(None);
        }
        self.first_from(SlotPosition::new(first, 0))
    }

    /// Tuple following `cursor`. Works on live cursors and on cursors whose
    /// tuple was deleted through them; a live cursor whose tuple was removed
    /// some other way continues after its key.
    pub fn get_next(&self, cursor: &TupleCursor) -> Result<Option<TupleCursor>> {
        let key = self.key_of(cursor.tuple());
        let columns = self.ctx.schema.key_columns();
        match cursor.state() {
            CursorState::Live { slot, pointer } => {
                if let Some(leaf) = self.leaf_if_live(slot.page)? {
                    if slot.index < leaf.num_tuples()
                        && leaf.tuple_offset(slot.index) == usize::from(pointer.offset)
                        && compare_tuples(&leaf.key(slot.index)?, &key, columns) == Ordering::Equal
                    {
                        return self.first_from(SlotPosition::new(slot.page, slot.index + 1));
                    }
                }
                debug!(target: "arbor::btree", %pointer, "cursor slot moved, relocating by key");
                self.find_first_greater(&key)
            }
            CursorState::Resumable { next: None } => Ok(None),
            CursorState::Resumable { next: Some(slot) } => {
                if let Some(leaf) = self.leaf_if_live(slot.page)? {
                    if self.resumes_after(&leaf, slot.index, &key)? {
                        return self.first_from(slot);
                    }
                }
                self.find_first_greater(&key)
            }
        }
    }

    /// True when `idx` in `leaf` is still the position right after `key`.
    fn resumes_after(&self, leaf: &LeafPage, idx: usize, key: &Tuple) -> Result<bool> {
        let columns = self.ctx.schema.key_columns();
        let n = leaf.num_tuples();
        if idx > n {
            return Ok(false);
        }
        let before_ok =
            idx == 0 || compare_tuples(&leaf.key(idx - 1)?, key, columns) == Ordering::Less;
        let after_ok =
            idx == n || compare_tuples(&leaf.key(idx)?, key, columns) == Ordering::Greater;
        Ok(before_ok && after_ok)
    }

    /// Resolves an external reference.
    pub fn get_by_reference(&self, pointer: FilePointer) -> Result<TupleCursor> {
        let leaf = self
            .leaf_if_live(pointer.page)?
            .ok_or(ArborError::InvalidReference(pointer))?;
        let idx = leaf
            .index_at_offset(usize::from(pointer.offset))
            .ok_or(ArborError::InvalidReference(pointer))?;
        self.cursor_at(&leaf, idx)
    }

    fn check_search_key(&self, key: &Tuple) -> Result<()> {
        if key.len() > self.ctx.schema.key_columns() {
            return Err(ArborError::Invalid("search key has more columns than the tree key"));
        }
        Ok(())
    }

    /// First tuple whose key prefix is not less than `key`.
    pub fn seek(&self, key: &Tuple) -> Result<Option<TupleCursor>> {
        self.check_search_key(key)?;
        let Some((leaf, _)) = self.navigator().navigate(key, Descend::Lower, false)? else {
            return Ok(None);
        };
        let idx = lower_bound(&leaf, key, false)?;
        self.first_from(SlotPosition::new(leaf.page_id(), idx))
    }

    /// First tuple whose key starts with `key`. `key` may hold fewer columns
    /// than the tree key.
    pub fn find_first_equal(&self, key: &Tuple) -> Result<Option<TupleCursor>> {
        Ok(self
            .seek(key)?
            .filter(|cursor| compare_partial(key, cursor.tuple()) == Ordering::Equal))
    }

    /// First tuple whose key prefix is greater than `key`.
    pub fn find_first_greater(&self, key: &Tuple) -> Result<Option<TupleCursor>> {
        self.check_search_key(key)?;
        let Some((leaf, _)) = self.navigator().navigate(key, Descend::Upper, false)? else {
            return Ok(None);
        };
        let idx = lower_bound(&leaf, key, true)?;
        self.first_from(SlotPosition::new(leaf.page_id(), idx))
    }

    /// Stores `tuple`, rejecting a key that is already present.
    pub fn insert(&mut self, tuple: Tuple) -> Result<TupleCursor> {
        let bytes = encode_tuple(&self.ctx.schema, &tuple)?;
        let max = self.max_tuple_len();
        if bytes.len() > max {
            return Err(ArborError::TupleTooLarge {
                size: bytes.len(),
                max,
            });
        }
        let key = self.key_of(&tuple);
        let (leaf, path) = self
            .navigator()
            .navigate(&key, Descend::Upper, true)?
            .ok_or(ArborError::Corruption("insert found no leaf"))?;
        let (idx, found) = leaf.search(&key)?;
        if found {
            return Err(ArborError::DuplicateKey);
        }
        let slot = LeafRebalancer::new(&self.ctx).insert(leaf, &path, idx, &bytes)?;
        let leaf = self.ctx.load_leaf(slot.page)?;
        self.cursor_at(&leaf, slot.index)
    }

    /// Deletes the cursor's tuple. The cursor becomes resumable: `get_next`
    /// on it returns the tuple that followed the deleted one.
    pub fn delete(&mut self, cursor: &mut TupleCursor) -> Result<()> {
        let pointer = cursor
            .file_pointer()
            .ok_or(ArborError::Invalid("tuple already deleted through this cursor"))?;
        let key = self.key_of(cursor.tuple());
        let Some((leaf, path)) = self.navigator().navigate(&key, Descend::Upper, false)? else {
            return Err(ArborError::InvalidReference(pointer));
        };
        let (idx, found) = leaf.search(&key)?;
        if !found {
            return Err(ArborError::InvalidReference(pointer));
        }
        let next = LeafRebalancer::new(&self.ctx).delete(leaf, &path, idx)?;
        cursor.mark_deleted(next);
        Ok(())
    }

    /// Deletes the tuple whose full key equals `key`. Returns false when no
    /// such tuple exists.
    pub fn delete_key(&mut self, key: &Tuple) -> Result<bool> {
        if key.len() != self.ctx.schema.key_columns() {
            return Err(ArborError::Invalid("delete needs every key column"));
        }
        match self.find_first_equal(key)? {
            Some(mut cursor) => {
                self.delete(&mut cursor)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Checks every structural invariant. An empty list means the file is sound.
    pub fn verify(&self) -> Result<Vec<String>> {
        Ok(self.verify_report()?.diagnostics)
    }

    /// [`BTreeFile::verify`] with the page count, for reporting.
    pub fn verify_report(&self) -> Result<VerifyReport> {
        verify::verify_tree(&self.ctx)
    }

    /// Recomputes table statistics and stores them in the header.
    pub fn analyze(&mut self) -> Result<TableStats> {
        let stats = analyze::collect(&self.ctx)?;
        self.ctx.header()?.write_stats(&stats.to_bytes())?;
        info!(
            target: "arbor::btree",
            tuples = stats.num_tuples,
            leaves = stats.leaf_pages,
            depth = stats.depth,
            "analyzed tree"
        );
        Ok(stats)
    }

    /// Statistics stored by the last [`BTreeFile::analyze`], if any.
    pub fn table_stats(&self) -> Result<Option<TableStats>> {
        let bytes = self.ctx.header()?.stats_bytes()?;
        if bytes.is_empty() {
            return Ok(None);
        }
        TableStats::from_bytes(&bytes).map(Some)
    }

    /// Iterates over every tuple in key order.
    pub fn iter(&self) -> Scan<'_> {
        Scan {
            file: self,
            cursor: None,
            start: None,
            done: false,
        }
    }

    /// Iterates in key order starting at the first tuple not less than `key`.
    pub fn iter_from(&self, key: Tuple) -> Scan<'_> {
        Scan {
            file: self,
            cursor: None,
            start: Some(key),
            done: false,
        }
    }
}

/// Index of the first tuple in `leaf` ordered after `key` (`strict`) or not
/// before it, comparing key prefixes.
fn lower_bound(leaf: &LeafPage, key: &Tuple, strict: bool) -> Result<usize> {
    let (mut lo, mut hi) = (0, leaf.num_tuples());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let ord = compare_partial(key, &leaf.tuple(mid)?);
        let key_first = if strict {
            ord == Ordering::Less
        } else {
            ord != Ordering::Greater
        };
        if key_first {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}

/// Key-ordered iterator built on [`BTreeFile::get_first`] and
/// [`BTreeFile::get_next`].
pub struct Scan<'a> {
    file: &'a BTreeFile,
    cursor: Option<TupleCursor>,
    start: Option<Tuple>,
    done: bool,
}

impl Iterator for Scan<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match (&self.cursor, self.start.take()) {
            (Some(cursor), _) => self.file.get_next(cursor),
            (None, Some(key)) => self.file.seek(&key),
            (None, None) => self.file.get_first(),
        };
        match step {
            Ok(Some(cursor)) => {
                let tuple = cursor.tuple().clone();
                self.cursor = Some(cursor);
                Some(Ok(tuple))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
