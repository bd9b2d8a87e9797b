use crate::storage::tuple::Tuple;
use crate::types::{FilePointer, PageId};

/// Tuple slot inside a leaf: page number and tuple index.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SlotPosition {
    /// Leaf page.
    pub page: PageId,
    /// Index of the tuple within the leaf.
    pub index: usize,
}

impl SlotPosition {
    /// Creates a slot position.
    pub fn new(page: PageId, index: usize) -> Self {
        Self { page, index }
    }

    /// Where this slot ends up after the first `count` tuples of `src` move to
    /// the end of `dst`, which held `dst_len` tuples.
    pub(crate) fn after_move_left(
        self,
        src: PageId,
        dst: PageId,
        count: usize,
        dst_len: usize,
    ) -> Self {
        if self.page != src {
            self
        } else if self.index < count {
            Self::new(dst, dst_len + self.index)
        } else {
            Self::new(src, self.index - count)
        }
    }

    /// Where this slot ends up after the last `count` of the `src_len` tuples
    /// of `src` move to the front of `dst`.
    pub(crate) fn after_move_right(
        self,
        src: PageId,
        dst: PageId,
        count: usize,
        src_len: usize,
    ) -> Self {
        let keep = src_len - count;
        if self.page == src && self.index >= keep {
            Self::new(dst, self.index - keep)
        } else if self.page == dst {
            Self::new(dst, self.index + count)
        } else {
            self
        }
    }
}

/// Where a cursor stands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CursorState {
    /// The cursor's tuple is stored at `slot`, starting at byte `pointer`.
    Live {
        /// Slot holding the tuple.
        slot: SlotPosition,
        /// External reference of the tuple.
        pointer: FilePointer,
    },
    /// The tuple was deleted through this cursor; scanning resumes at `next`,
    /// or ends when it is `None`.
    Resumable {
        /// Slot of the tuple that followed the deleted one.
        next: Option<SlotPosition>,
    },
}

/// Handle on one tuple returned by lookups and scans.
///
/// Deleting through the cursor turns it into a resumable position, so a scan
/// can call `get_next` on it afterwards.
#[derive(Clone, Debug)]
pub struct TupleCursor {
    tuple: Tuple,
    state: CursorState,
}

impl TupleCursor {
    pub(crate) fn live(tuple: Tuple, slot: SlotPosition, offset: usize) -> Self {
        Self {
            tuple,
            state: CursorState::Live {
                slot,
                pointer: FilePointer::new(slot.page, offset as u16),
            },
        }
    }

    /// The tuple's values. After a delete these are the deleted values.
    pub fn tuple(&self) -> &Tuple {
        &self.tuple
    }

    /// Consumes the cursor, returning the tuple.
    pub fn into_tuple(self) -> Tuple {
        self.tuple
    }

    /// Current state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// External reference of a live tuple.
    pub fn file_pointer(&self) -> Option<FilePointer> {
        match self.state {
            CursorState::Live { pointer, .. } => Some(pointer),
            CursorState::Resumable { .. } => None,
        }
    }

    /// True once the tuple has been deleted through this cursor.
    pub fn is_deleted(&self) -> bool {
        matches!(self.state, CursorState::Resumable { .. })
    }

    pub(crate) fn mark_deleted(&mut self, next: Option<SlotPosition>) {
        self.state = CursorState::Resumable { next };
    }
}
