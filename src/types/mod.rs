#![forbid(unsafe_code)]

//! Core identifiers, the page-kind tag and the crate error type.

use std::fmt;

/// Page number within one file. Page 0 is always the header page.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageId(pub u16);

impl PageId {
    /// The header page, also used as the "no page" marker inside page links.
    pub const HEADER: PageId = PageId(0);

    /// Returns true when this id is the null link value.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this page in a file with the given page size.
    pub fn file_offset(self, page_size: usize) -> u64 {
        u64::from(self.0) * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External reference to one tuple: its page and byte offset inside that page.
///
/// Ordered by page number, then offset.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct FilePointer {
    /// Page holding the tuple.
    pub page: PageId,
    /// Offset of the tuple's first byte within the page.
    pub offset: u16,
}

impl FilePointer {
    /// Builds a file pointer from raw parts.
    pub fn new(page: PageId, offset: u16) -> Self {
        Self { page, offset }
    }
}

impl fmt::Display for FilePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FP[{}:{}]", self.page.0, self.offset)
    }
}

/// File-type tag stored in byte 0 of the header page.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FileType {
    /// Unordered heap tuple file. Recognized so it can be rejected cleanly.
    HeapTupleFile = 1,
    /// B+ tree tuple file.
    BTreeTupleFile = 2,
}

impl FileType {
    /// Returns the on-disk tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FileType {
    type Error = ArborError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FileType::HeapTupleFile),
            2 => Ok(FileType::BTreeTupleFile),
            _ => Err(ArborError::Corruption("unknown file type")),
        }
    }
}

/// Page-kind tag stored in byte 0 of every non-header page.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PageKind {
    /// Inner node: interleaved child pointers and separator keys.
    Inner = 1,
    /// Leaf node: ordered tuples plus a next-leaf link.
    Leaf = 2,
    /// Reclaimed page linked into the free list.
    Empty = 3,
}

impl PageKind {
    /// Returns the on-disk tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PageKind {
    type Error = ArborError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageKind::Inner),
            2 => Ok(PageKind::Leaf),
            3 => Ok(PageKind::Empty),
            _ => Err(ArborError::Corruption("unknown page kind")),
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageKind::Inner => "inner",
            PageKind::Leaf => "leaf",
            PageKind::Empty => "empty",
        };
        f.write_str(name)
    }
}

/// Errors returned by the storage engine.
#[derive(thiserror::Error, Debug)]
pub enum ArborError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Structural corruption found while traversing pages.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the engine cannot use.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A file pointer that does not name a live tuple.
    #[error("invalid tuple reference {0}")]
    InvalidReference(FilePointer),
    /// A tuple with the same key is already stored.
    #[error("duplicate key")]
    DuplicateKey,
    /// The tuple can never be stored in a page of this size.
    #[error("tuple of {size} bytes exceeds the {max} byte limit for this page size")]
    TupleTooLarge {
        /// Encoded size of the rejected tuple.
        size: usize,
        /// Largest tuple size this file accepts.
        max: usize,
    },
    /// Every page number is in use.
    #[error("file has reached the maximum page count")]
    FileFull,
}

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, ArborError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_kind_from_u8_rejects_unknown() {
        assert_eq!(PageKind::try_from(2).ok(), Some(PageKind::Leaf));
        assert!(matches!(
            PageKind::try_from(9),
            Err(ArborError::Corruption("unknown page kind"))
        ));
    }

    #[test]
    fn file_pointer_orders_by_page_then_offset() {
        let a = FilePointer::new(PageId(1), 900);
        let b = FilePointer::new(PageId(2), 5);
        let c = FilePointer::new(PageId(2), 40);
        assert!(a < b && b < c);
        assert_eq!(c.to_string(), "FP[2:40]");
    }
}
