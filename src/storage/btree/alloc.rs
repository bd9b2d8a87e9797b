//! Page allocation for tree nodes, backed by the free list rooted in the header.
//!
//! An empty page stores its kind tag and, at bytes 1..3, the next free page.

use tracing::debug;

use crate::primitives::pager::PageRef;
use crate::types::{ArborError, PageId, PageKind, Result};

use super::context::TreeContext;
use super::page::{
    expect_kind, read_page_id, write_page_id, COUNT_OFFSET, KIND_OFFSET, NEXT_PAGE_OFFSET,
};

pub(crate) struct FreeListAllocator<'a> {
    ctx: &'a TreeContext,
}

impl<'a> FreeListAllocator<'a> {
    pub fn new(ctx: &'a TreeContext) -> Self {
        Self { ctx }
    }

    /// Pops the free-list head, or extends the file when the list is empty.
    pub fn allocate(&self) -> Result<PageRef> {
        let header = self.ctx.header()?;
        let head = header.free_list_head();
        let page = if head.is_null() {
            self.ctx.store.allocate_page()?
        } else {
            let page = self.ctx.store.load_page(head)?;
            let next = {
                let buf = page.read();
                expect_kind(&buf, PageKind::Empty)
                    .map_err(|_| ArborError::Corruption("free list holds a non-empty page"))?;
                read_page_id(&buf, NEXT_PAGE_OFFSET)
            };
            header.set_free_list_head(next);
            page
        };
        self.ctx.stats.inc_pages_allocated();
        debug!(
            target: "arbor::btree",
            page = page.id().0,
            reused = !head.is_null(),
            "allocated page"
        );
        Ok(page)
    }

    /// Retags `page` as empty and pushes it onto the free list.
    pub fn release(&self, page: &PageRef) -> Result<()> {
        let header = self.ctx.header()?;
        let head = header.free_list_head();
        if head == page.id() {
            return Err(ArborError::Corruption("page released twice"));
        }
        {
            let mut buf = page.write();
            buf[KIND_OFFSET] = PageKind::Empty.as_u8();
            write_page_id(&mut buf, NEXT_PAGE_OFFSET, head);
            if self.ctx.options.clear_released_pages {
                buf[COUNT_OFFSET..].fill(0);
            }
        }
        header.set_free_list_head(page.id());
        self.ctx.stats.inc_pages_released();
        debug!(target: "arbor::btree", page = page.id().0, "released page");
        Ok(())
    }
}

/// Walks the free list starting at `head`, failing on a cycle.
pub(crate) fn free_list_pages(ctx: &TreeContext, head: PageId) -> Result<Vec<PageId>> {
    let mut pages = Vec::new();
    let mut next = head;
    let limit = ctx.store.num_pages() as usize;
    while !next.is_null() {
        if pages.len() >= limit {
            return Err(ArborError::Corruption("free list contains a cycle"));
        }
        pages.push(next);
        let page = ctx.store.load_page(next)?;
        let buf = page.read();
        expect_kind(&buf, PageKind::Empty)
            .map_err(|_| ArborError::Corruption("free list holds a non-empty page"))?;
        next = read_page_id(&buf, NEXT_PAGE_OFFSET);
    }
    Ok(pages)
}
