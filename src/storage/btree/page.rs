//! Byte layout shared by every tree page. All integers are big-endian.

use crate::types::{ArborError, PageId, PageKind, Result};

/// Offset of the page-kind tag.
pub const KIND_OFFSET: usize = 0;
/// Leaf pages: next leaf in the chain. Empty pages: next free page.
pub const NEXT_PAGE_OFFSET: usize = 1;
/// Inner pages: pointer count. Leaf pages: tuple count.
pub const COUNT_OFFSET: usize = 3;
/// First byte of the entries on inner and leaf pages.
pub const ENTRIES_OFFSET: usize = 5;
/// Size of a child pointer on an inner page.
pub const POINTER_LEN: usize = 2;

/// Fixed overhead used to derive the largest storable tuple: the page header,
/// the first child pointer and the two pointers of a fresh root.
const SPLIT_OVERHEAD: usize = ENTRIES_OFFSET + 4 * POINTER_LEN;

/// Largest tuple a file with `page_size` pages accepts.
///
/// At this size any full leaf plus one tuple, and any full inner page plus one
/// entry, divides into two halves that each fit in a page.
pub fn max_tuple_len(page_size: usize) -> usize {
    (page_size - SPLIT_OVERHEAD) / 3
}

/// Reads a big-endian u16.
#[inline]
pub fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

/// Writes a big-endian u16.
#[inline]
pub fn write_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

/// Reads a page number.
#[inline]
pub fn read_page_id(buf: &[u8], at: usize) -> PageId {
    PageId(read_u16(buf, at))
}

/// Writes a page number.
#[inline]
pub fn write_page_id(buf: &mut [u8], at: usize, id: PageId) {
    write_u16(buf, at, id.0);
}

/// Decodes the kind tag of a tree page.
pub fn page_kind(buf: &[u8]) -> Result<PageKind> {
    PageKind::try_from(buf[KIND_OFFSET])
}

/// Fails with `Corruption` unless the page carries the expected kind.
pub fn expect_kind(buf: &[u8], expected: PageKind) -> Result<()> {
    match page_kind(buf)? {
        kind if kind == expected => Ok(()),
        PageKind::Inner => Err(ArborError::Corruption("expected leaf page, found inner page")),
        PageKind::Leaf => Err(ArborError::Corruption("expected inner page, found leaf page")),
        PageKind::Empty => Err(ArborError::Corruption("tree references an empty page")),
    }
}

/// Shifts `buf[from..end]` by `delta` bytes (positive moves right) and zeroes
/// the bytes uncovered at the tail when shrinking.
pub fn shift_region(buf: &mut [u8], from: usize, end: usize, delta: isize) {
    if delta != 0 && from != end {
        let dest = (from as isize + delta) as usize;
        buf.copy_within(from..end, dest);
    }
    if delta < 0 {
        let start = (end as isize + delta) as usize;
        buf[start..end].fill(0);
    }
}
