use std::sync::Arc;

use parking_lot::Mutex;

use super::{format_file_prefix, PageFrame, PageRef, PageStore, MAX_PAGES};
use crate::types::{ArborError, FileType, PageId, Result};

/// Page store that keeps every page in memory. Nothing is ever evicted.
pub struct MemPager {
    page_size: usize,
    file_type: FileType,
    pages: Mutex<Vec<PageRef>>,
}

impl MemPager {
    /// Creates an in-memory file holding only its page 0 prefix.
    pub fn create(file_type: FileType, page_size: usize) -> Result<Self> {
        let mut header = vec![0u8; page_size].into_boxed_slice();
        format_file_prefix(&mut header, file_type)?;
        Ok(Self {
            page_size,
            file_type,
            pages: Mutex::new(vec![PageFrame::new(PageId::HEADER, header, true)]),
        })
    }
}

impl PageStore for MemPager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn num_pages(&self) -> u32 {
        self.pages.lock().len() as u32
    }

    fn file_type(&self) -> FileType {
        self.file_type
    }

    fn load_page(&self, id: PageId) -> Result<PageRef> {
        self.pages
            .lock()
            .get(usize::from(id.0))
            .map(Arc::clone)
            .ok_or(ArborError::Invalid("page number past end of file"))
    }

    fn allocate_page(&self) -> Result<PageRef> {
        let mut pages = self.pages.lock();
        if pages.len() as u32 >= MAX_PAGES {
            return Err(ArborError::FileFull);
        }
        let id = PageId(pages.len() as u16);
        let frame = PageFrame::new(id, vec![0u8; self.page_size].into_boxed_slice(), true);
        pages.push(Arc::clone(&frame));
        Ok(frame)
    }

    fn flush(&self) -> Result<()> {
        for page in self.pages.lock().iter() {
            page.take_dirty();
        }
        Ok(())
    }
}
