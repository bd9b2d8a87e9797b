//! Structural verifier.
//!
//! Five read-only passes over the file:
//! 1. record the kind tag of every page,
//! 2. walk the tree from the root checking child kinds, key order and key
//!    bounds handed down from parents,
//! 3. walk the leaf chain from the leftmost leaf checking global key order and
//!    that it lists exactly the leaves of pass 2,
//! 4. walk the free list checking every page on it is empty,
//! 5. check every page was reached exactly once by the walk it belongs to.
//!
//! Structural problems become diagnostics; only I/O errors abort.

use std::cmp::Ordering;

use serde::Serialize;

use crate::storage::tuple::{compare_tuples, Tuple};
use crate::types::{ArborError, PageId, PageKind, Result};

use super::context::TreeContext;
use super::page::{page_kind, read_page_id, NEXT_PAGE_OFFSET};

/// Visits of a single page after which a walk is treated as cyclic.
const MAX_REVISITS: u32 = 10;

/// Verifier output, serializable for the command line.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyReport {
    /// Pages in the file, header included.
    pub pages: u32,
    /// One line per problem found.
    pub diagnostics: Vec<String>,
}

impl VerifyReport {
    /// True when no problem was found.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

enum Flow {
    Continue,
    Abort,
}

struct Verifier<'a> {
    ctx: &'a TreeContext,
    num_pages: usize,
    kinds: Vec<Option<PageKind>>,
    tree_visits: Vec<u32>,
    chain_visits: Vec<u32>,
    free_visits: Vec<u32>,
    tree_leaves: Vec<PageId>,
    leaf_depth: Option<usize>,
    diagnostics: Vec<String>,
}

/// Runs every pass and returns the diagnostics.
pub(crate) fn verify_tree(ctx: &TreeContext) -> Result<VerifyReport> {
    let num_pages = ctx.store.num_pages() as usize;
    let mut verifier = Verifier {
        ctx,
        num_pages,
        kinds: vec![None; num_pages],
        tree_visits: vec![0; num_pages],
        chain_visits: vec![0; num_pages],
        free_visits: vec![0; num_pages],
        tree_leaves: Vec::new(),
        leaf_depth: None,
        diagnostics: Vec::new(),
    };
    verifier.scan_kinds()?;
    let header = ctx.header()?;
    let (root, first_leaf, free_head) =
        (header.root(), header.first_leaf(), header.free_list_head());
    drop(header);
    if root.is_null() {
        if !first_leaf.is_null() {
            verifier.report(format!("empty tree records first leaf page {first_leaf}"));
        }
    } else if verifier.in_file(root, "root") {
        verifier.walk_tree(root, None, None, 1)?;
        verifier.walk_chain(root, first_leaf)?;
    }
    verifier.walk_free_list(free_head)?;
    verifier.cross_check();
    Ok(VerifyReport {
        pages: num_pages as u32,
        diagnostics: verifier.diagnostics,
    })
}

impl<'a> Verifier<'a> {
    fn report(&mut self, message: String) {
        self.diagnostics.push(message);
    }

    /// Turns a structural error into a diagnostic. I/O errors propagate.
    fn absorb<T>(
        &mut self,
        result: Result<T>,
        context: impl FnOnce() -> String,
    ) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(ArborError::Io(err)) => Err(ArborError::Io(err)),
            Err(err) => {
                let message = format!("{}: {err}", context());
                self.report(message);
                Ok(None)
            }
        }
    }

    fn in_file(&mut self, id: PageId, what: &str) -> bool {
        if id.is_null() || usize::from(id.0) >= self.num_pages {
            self.report(format!("{what} points to page {id}, outside the tree pages"));
            return false;
        }
        true
    }

    fn kind(&self, id: PageId) -> Option<PageKind> {
        self.kinds.get(usize::from(id.0)).copied().flatten()
    }

    fn scan_kinds(&mut self) -> Result<()> {
        for n in 1..self.num_pages {
            let page = self.ctx.store.load_page(PageId(n as u16))?;
            let (tag, kind) = {
                let bytes = page.read();
                (bytes[0], page_kind(&bytes))
            };
            match kind {
                Ok(kind) => self.kinds[n] = Some(kind),
                Err(_) => self.report(format!("page {n} has unknown kind tag {tag}")),
            }
        }
        Ok(())
    }

    fn visit(visits: &mut [u32], id: PageId) -> u32 {
        let slot = &mut visits[usize::from(id.0)];
        *slot += 1;
        *slot
    }

    fn walk_tree(
        &mut self,
        id: PageId,
        low: Option<Tuple>,
        high: Option<Tuple>,
        depth: usize,
    ) -> Result<Flow> {
        if Self::visit(&mut self.tree_visits, id) > MAX_REVISITS {
            self.report(format!("tree walk revisits page {id} repeatedly; tree pass aborted"));
            return Ok(Flow::Abort);
        }
        match self.kind(id) {
            Some(PageKind::Inner) => self.walk_inner(id, low, high, depth),
            Some(PageKind::Leaf) => {
                self.walk_leaf(id, low, high, depth)?;
                Ok(Flow::Continue)
            }
            Some(PageKind::Empty) => {
                self.report(format!("tree references empty page {id}"));
                Ok(Flow::Continue)
            }
            None => Ok(Flow::Continue),
        }
    }

    fn walk_inner(
        &mut self,
        id: PageId,
        low: Option<Tuple>,
        high: Option<Tuple>,
        depth: usize,
    ) -> Result<Flow> {
        let loaded = self.ctx.load_inner(id);
        let Some(inner) = self.absorb(loaded, || format!("inner page {id}"))? else {
            return Ok(Flow::Continue);
        };
        let columns = self.ctx.key_schema.len();
        let mut keys = Vec::with_capacity(inner.num_keys());
        for i in 0..inner.num_keys() {
            let key = inner.key(i);
            match self.absorb(key, || format!("inner page {id} key {i}"))? {
                Some(key) => keys.push(key),
                None => return Ok(Flow::Continue),
            }
        }
        if inner.num_pointers() < 2 {
            self.report(format!("inner page {id} has {} pointers", inner.num_pointers()));
        }
        for (i, pair) in keys.windows(2).enumerate() {
            if compare_tuples(&pair[0], &pair[1], columns) != Ordering::Less {
                self.report(format!("inner page {id} keys {i} and {} are out of order", i + 1));
            }
        }
        for (i, key) in keys.iter().enumerate() {
            if !within(key, low.as_ref(), high.as_ref(), columns) {
                self.report(format!(
                    "inner page {id} key {i} {key} lies outside its parent's range"
                ));
            }
        }

        let children = inner.pointers();
        let mut child_kind = None;
        for (i, child) in children.iter().enumerate() {
            if !self.in_file(*child, &format!("inner page {id} pointer {i}")) {
                continue;
            }
            match (child_kind, self.kind(*child)) {
                (_, Some(PageKind::Empty)) | (_, None) => {}
                (None, kind) => child_kind = kind,
                (Some(expected), Some(kind)) if expected != kind => {
                    self.report(format!("inner page {id} mixes {expected} and {kind} children"));
                }
                _ => {}
            }
            let child_low = if i == 0 { low.clone() } else { keys.get(i - 1).cloned() };
            let child_high = if i + 1 == children.len() {
                high.clone()
            } else {
                keys.get(i).cloned()
            };
            if let Flow::Abort = self.walk_tree(*child, child_low, child_high, depth + 1)? {
                return Ok(Flow::Abort);
            }
        }
        Ok(Flow::Continue)
    }

    fn walk_leaf(
        &mut self,
        id: PageId,
        low: Option<Tuple>,
        high: Option<Tuple>,
        depth: usize,
    ) -> Result<()> {
        self.tree_leaves.push(id);
        match self.leaf_depth {
            None => self.leaf_depth = Some(depth),
            Some(expected) if expected != depth => {
                self.report(format!(
                    "leaf page {id} at depth {depth}, other leaves at depth {expected}"
                ));
            }
            _ => {}
        }
        let loaded = self.ctx.load_leaf(id);
        let Some(leaf) = self.absorb(loaded, || format!("leaf page {id}"))? else {
            return Ok(());
        };
        if leaf.num_tuples() == 0 && depth > 1 {
            self.report(format!("non-root leaf page {id} is empty"));
        }
        let columns = self.ctx.schema.key_columns();
        let mut previous: Option<Tuple> = None;
        for i in 0..leaf.num_tuples() {
            let key = leaf.key(i);
            let Some(key) = self.absorb(key, || format!("leaf page {id} tuple {i}"))? else {
                return Ok(());
            };
            if let Some(prev) = &previous {
                if compare_tuples(prev, &key, columns) != Ordering::Less {
                    self.report(format!(
                        "leaf page {id} tuples {} and {i} are out of order", i - 1
                    ));
                }
            }
            if !within(&key, low.as_ref(), high.as_ref(), columns) {
                self.report(format!(
                    "leaf page {id} tuple {i} {key} lies outside its parent's range"
                ));
            }
            previous = Some(key);
        }
        Ok(())
    }

    /// Descends first pointers from the root to find where the chain starts.
    fn leftmost_leaf(&mut self, root: PageId) -> Result<Option<PageId>> {
        let mut current = root;
        for _ in 0..self.num_pages {
            match self.kind(current) {
                Some(PageKind::Leaf) => return Ok(Some(current)),
                Some(PageKind::Inner) => {
                    let loaded = self.ctx.load_inner(current);
                    let context = || format!("inner page {current}");
                    let Some(inner) = self.absorb(loaded, context)? else {
                        return Ok(None);
                    };
                    if inner.num_pointers() == 0 {
                        return Ok(None);
                    }
                    current = inner.pointer(0);
                    if !self.in_file(current, "leftmost descent") {
                        return Ok(None);
                    }
                }
                _ => return Ok(None),
            }
        }
        self.report("leftmost descent does not reach a leaf".to_string());
        Ok(None)
    }

    fn walk_chain(&mut self, root: PageId, first_leaf: PageId) -> Result<()> {
        let Some(start) = self.leftmost_leaf(root)? else {
            self.report("no leftmost leaf found; chain pass skipped".to_string());
            return Ok(());
        };
        if start != first_leaf {
            self.report(format!(
                "header first leaf is page {first_leaf}, leftmost leaf is page {start}"
            ));
        }
        let columns = self.ctx.schema.key_columns();
        let mut chain = Vec::new();
        let mut last_key: Option<Tuple> = None;
        let mut current = start;
        loop {
            if Self::visit(&mut self.chain_visits, current) > MAX_REVISITS {
                self.report(format!(
                    "leaf chain revisits page {current} repeatedly; chain pass aborted"
                ));
                return Ok(());
            }
            chain.push(current);
            if self.kind(current) != Some(PageKind::Leaf) {
                self.report(format!("leaf chain reaches non-leaf page {current}"));
                break;
            }
            let loaded = self.ctx.load_leaf(current);
            let Some(leaf) = self.absorb(loaded, || format!("leaf page {current}"))? else {
                break;
            };
            for i in 0..leaf.num_tuples() {
                let key = leaf.key(i);
                let context = || format!("leaf page {current} tuple {i}");
                let Some(key) = self.absorb(key, context)? else {
                    break;
                };
                if let Some(prev) = &last_key {
                    if compare_tuples(prev, &key, columns) != Ordering::Less {
                        self.report(format!("leaf chain out of order at page {current} tuple {i}"));
                    }
                }
                last_key = Some(key);
            }
            let next = leaf.next_page();
            if next.is_null() {
                break;
            }
            if !self.in_file(next, &format!("leaf page {current} next link")) {
                break;
            }
            current = next;
        }
        if chain != self.tree_leaves {
            self.report(format!(
                "leaf chain lists {} leaves, tree walk found {} in a different order or set",
                chain.len(),
                self.tree_leaves.len()
            ));
        }
        Ok(())
    }

    fn walk_free_list(&mut self, head: PageId) -> Result<()> {
        let mut current = head;
        while !current.is_null() {
            if !self.in_file(current, "free list") {
                return Ok(());
            }
            if Self::visit(&mut self.free_visits, current) > MAX_REVISITS {
                self.report(format!(
                    "free list revisits page {current} repeatedly; free-list pass aborted"
                ));
                return Ok(());
            }
            if self.kind(current) != Some(PageKind::Empty) {
                self.report(format!("free list holds non-empty page {current}"));
                return Ok(());
            }
            let page = self.ctx.store.load_page(current)?;
            current = read_page_id(&page.read(), NEXT_PAGE_OFFSET);
        }
        Ok(())
    }

    fn cross_check(&mut self) {
        for n in 1..self.num_pages {
            let id = PageId(n as u16);
            let (tree, chain, free) =
                (self.tree_visits[n], self.chain_visits[n], self.free_visits[n]);
            match self.kinds[n] {
                Some(PageKind::Inner) if tree != 1 => {
                    self.report(format!("inner page {id} reached {tree} times by the tree walk"));
                }
                Some(PageKind::Leaf) => {
                    if tree != 1 {
                        self.report(format!(
                            "leaf page {id} reached {tree} times by the tree walk"
                        ));
                    }
                    if chain != 1 {
                        self.report(format!(
                            "leaf page {id} reached {chain} times by the leaf chain"
                        ));
                    }
                }
                Some(PageKind::Empty) if free != 1 => {
                    self.report(format!("empty page {id} reached {free} times by the free list"));
                }
                _ => {}
            }
        }
    }
}

/// `low <= key < high` on the key columns; a missing bound is open.
fn within(key: &Tuple, low: Option<&Tuple>, high: Option<&Tuple>, columns: usize) -> bool {
    low.map_or(true, |low| compare_tuples(low, key, columns) != Ordering::Greater)
        && high.map_or(true, |high| compare_tuples(key, high, columns) == Ordering::Less)
}
