use smallvec::smallvec;
use tracing::{debug, trace};

use crate::storage::tuple::Tuple;
use crate::types::{ArborError, PageId, Result};

use super::context::{Node, PagePath, TreeContext};
use super::inner::Descend;
use super::leaf::LeafPage;

/// Deepest tree accepted before a descent is treated as a pointer cycle.
const MAX_DEPTH: usize = 32;

/// Root-to-leaf descent. Pages store no parent pointers, so every descent
/// returns the path it took.
pub(crate) struct TreeNavigator<'a> {
    ctx: &'a TreeContext,
}

impl<'a> TreeNavigator<'a> {
    pub fn new(ctx: &'a TreeContext) -> Self {
        Self { ctx }
    }

    /// Finds the leaf whose range holds `key`. An empty tree yields `None`,
    /// unless `create_if_empty` is set, in which case a fresh leaf becomes the
    /// root.
    pub fn navigate(
        &self,
        key: &Tuple,
        descend: Descend,
        create_if_empty: bool,
    ) -> Result<Option<(LeafPage, PagePath)>> {
        let header = self.ctx.header()?;
        let root = header.root();
        if root.is_null() {
            if !create_if_empty {
                return Ok(None);
            }
            let page = self.ctx.allocator().allocate()?;
            let leaf = LeafPage::init(page, self.ctx.schema.clone());
            header.set_root(leaf.page_id());
            header.set_first_leaf(leaf.page_id());
            debug!(target: "arbor::btree", root = leaf.page_id().0, "created root leaf");
            let path: PagePath = smallvec![leaf.page_id()];
            return Ok(Some((leaf, path)));
        }

        let mut path: PagePath = smallvec![root];
        let mut current = root;
        loop {
            match self.ctx.load_node(current)? {
                Node::Leaf(leaf) => {
                    trace!(
                        target: "arbor::btree",
                        leaf = current.0,
                        depth = path.len(),
                        "navigated"
                    );
                    return Ok(Some((leaf, path)));
                }
                Node::Inner(inner) => {
                    let idx = inner.child_index(key, descend)?;
                    current = inner.pointer(idx);
                    if path.len() >= MAX_DEPTH {
                        return Err(ArborError::Corruption("tree deeper than any valid tree"));
                    }
                    path.push(current);
                }
            }
        }
    }

    /// Follows the last pointer of every inner page below `start` down to a leaf.
    pub fn rightmost_leaf(&self, start: PageId) -> Result<PageId> {
        let mut current = start;
        for _ in 0..MAX_DEPTH {
            match self.ctx.load_node(current)? {
                Node::Leaf(_) => return Ok(current),
                Node::Inner(inner) => {
                    let last = inner
                        .num_pointers()
                        .checked_sub(1)
                        .ok_or(ArborError::Corruption("inner page without pointers"))?;
                    current = inner.pointer(last);
                }
            }
        }
        Err(ArborError::Corruption("tree deeper than any valid tree"))
    }

    /// The leaf that precedes the node at the end of `path` in the leaf chain.
    /// It may hang off a different parent, so the search climbs to the closest
    /// ancestor where the path did not take the first pointer.
    pub fn chain_predecessor(&self, path: &[PageId]) -> Result<Option<PageId>> {
        for level in (0..path.len().saturating_sub(1)).rev() {
            let parent = self.ctx.load_inner(path[level])?;
            let idx = parent
                .index_of_pointer(path[level + 1])
                .ok_or(ArborError::Corruption("page path does not match parent pointers"))?;
            if idx > 0 {
                return self.rightmost_leaf(parent.pointer(idx - 1)).map(Some);
            }
        }
        Ok(None)
    }
}
