#![forbid(unsafe_code)]

//! Page cache collaborator used by the tree: load, allocate and persist pages.
//!
//! A [`PageRef`] pins its page for as long as it is held. Writing through
//! [`PageFrame::write`] marks the frame dirty, so callers never track dirtiness
//! themselves.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{ArborError, FileType, PageId, Result};

mod file;
mod mem;

pub use file::{FilePager, PagerStats};
pub use mem::MemPager;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 512;
/// Largest supported page size.
pub const MAX_PAGE_SIZE: usize = 65536;
/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: usize = 8192;
/// Page numbers are u16, so a file holds at most this many pages.
pub const MAX_PAGES: u32 = 1 << 16;

/// Offset of the file-type tag on page 0.
pub const FILE_TYPE_OFFSET: usize = 0;
/// Offset of the page-size exponent on page 0.
pub const PAGE_SIZE_OFFSET: usize = 1;

/// Validates `page_size` and returns its base-2 exponent.
pub fn page_size_exponent(page_size: usize) -> Result<u8> {
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) || !page_size.is_power_of_two() {
        return Err(ArborError::Invalid(
            "page size must be a power of two between 512 and 65536",
        ));
    }
    Ok(page_size.trailing_zeros() as u8)
}

/// Decodes a stored page-size exponent.
pub fn page_size_from_exponent(exponent: u8) -> Result<usize> {
    let size = 1usize
        .checked_shl(u32::from(exponent))
        .ok_or(ArborError::Corruption("page size exponent out of range"))?;
    page_size_exponent(size)
        .map_err(|_| ArborError::Corruption("page size exponent out of range"))?;
    Ok(size)
}

/// Writes the file-type tag and page-size exponent into a fresh page 0.
pub(crate) fn format_file_prefix(buf: &mut [u8], file_type: FileType) -> Result<()> {
    let exponent = page_size_exponent(buf.len())?;
    buf[FILE_TYPE_OFFSET] = file_type.as_u8();
    buf[PAGE_SIZE_OFFSET] = exponent;
    Ok(())
}

/// Configuration for page stores.
#[derive(Clone, Debug)]
pub struct PagerOptions {
    /// Size of each page in bytes. Only used when creating a file.
    pub page_size: usize,
    /// Number of frames the buffer pool keeps before evicting.
    pub cache_pages: usize,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: 256,
        }
    }
}

/// One cached page buffer.
pub struct PageFrame {
    id: PageId,
    data: RwLock<Box<[u8]>>,
    dirty: AtomicBool,
}

/// Pinned handle to a cached page.
pub type PageRef = Arc<PageFrame>;

impl PageFrame {
    pub(crate) fn new(id: PageId, data: Box<[u8]>, dirty: bool) -> PageRef {
        Arc::new(Self {
            id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(dirty),
        })
    }

    /// Page number of this frame.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Shared access to the page bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Exclusive access to the page bytes; marks the frame dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.dirty.store(true, AtomicOrdering::Release);
        self.data.write()
    }

    /// Returns true if the frame holds changes not yet written back.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, AtomicOrdering::AcqRel)
    }
}

/// Storage backend that hands out pinned page frames.
pub trait PageStore: Send + Sync {
    /// Size of every page in bytes.
    fn page_size(&self) -> usize;
    /// Number of pages in the file, header page included.
    fn num_pages(&self) -> u32;
    /// File-type tag recorded on page 0.
    fn file_type(&self) -> FileType;
    /// Loads an existing page.
    fn load_page(&self, id: PageId) -> Result<PageRef>;
    /// Extends the file by one zeroed page and returns it.
    fn allocate_page(&self) -> Result<PageRef>;
    /// Writes every dirty page back to storage.
    fn flush(&self) -> Result<()>;
}
