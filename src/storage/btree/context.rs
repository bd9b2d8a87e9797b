use std::sync::Arc;

use smallvec::SmallVec;

use crate::primitives::pager::{PageRef, PageStore};
use crate::storage::tuple::{encode_tuple, Schema, Tuple};
use crate::types::{ArborError, PageId, PageKind, Result};

use super::alloc::FreeListAllocator;
use super::header::TreeHeader;
use super::inner::InnerPage;
use super::leaf::LeafPage;
use super::page::page_kind;
use super::stats::BTreeStats;

/// Root-to-node page numbers, the node itself included.
pub(crate) type PagePath = SmallVec<[PageId; 8]>;

/// Tunables for a tree file.
#[derive(Clone, Debug)]
pub struct BTreeOptions {
    /// Zero the body of a page when it joins the free list.
    pub clear_released_pages: bool,
}

impl Default for BTreeOptions {
    fn default() -> Self {
        Self {
            clear_released_pages: true,
        }
    }
}

/// A loaded tree node of either kind.
pub(crate) enum Node {
    Inner(InnerPage),
    Leaf(LeafPage),
}

/// Everything the tree algorithms share: the store, the schemas and counters.
pub(crate) struct TreeContext {
    pub store: Arc<dyn PageStore>,
    pub schema: Arc<Schema>,
    pub key_schema: Arc<Schema>,
    pub stats: Arc<BTreeStats>,
    pub options: BTreeOptions,
}

impl TreeContext {
    pub fn new(store: Arc<dyn PageStore>, schema: Schema, options: BTreeOptions) -> Self {
        let key_schema = Arc::new(schema.key_schema());
        Self {
            store,
            schema: Arc::new(schema),
            key_schema,
            stats: Arc::new(BTreeStats::default()),
            options,
        }
    }

    pub fn header(&self) -> Result<TreeHeader> {
        TreeHeader::load(self.store.as_ref())
    }

    pub fn allocator(&self) -> FreeListAllocator<'_> {
        FreeListAllocator::new(self)
    }

    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    /// Fill threshold below which a non-root node counts as underfull.
    pub fn half_full(&self) -> usize {
        self.page_size() / 2
    }

    pub fn load_leaf(&self, id: PageId) -> Result<LeafPage> {
        LeafPage::load(self.load_tree_page(id)?, self.schema.clone())
    }

    pub fn load_inner(&self, id: PageId) -> Result<InnerPage> {
        InnerPage::load(self.load_tree_page(id)?, self.key_schema.clone())
    }

    pub fn load_node(&self, id: PageId) -> Result<Node> {
        let page = self.load_tree_page(id)?;
        let kind = page_kind(&page.read())?;
        match kind {
            PageKind::Inner => Ok(Node::Inner(InnerPage::load(page, self.key_schema.clone())?)),
            PageKind::Leaf => Ok(Node::Leaf(LeafPage::load(page, self.schema.clone())?)),
            PageKind::Empty => Err(ArborError::Corruption("tree references an empty page")),
        }
    }

    fn load_tree_page(&self, id: PageId) -> Result<PageRef> {
        if id.is_null() {
            return Err(ArborError::Corruption("tree references the header page"));
        }
        self.store.load_page(id)
    }

    /// Encodes the key columns of `key` as a separator.
    pub fn encode_key(&self, key: &Tuple) -> Result<Vec<u8>> {
        encode_tuple(&self.key_schema, &key.prefix(self.schema.key_columns()))
    }
}
