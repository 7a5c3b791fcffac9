//! Handles for arenas, heap blocks, allocations and defer slots.
//!
//! All handles are plain `Copy` values that resolve through the owning
//! [`Heap`](crate::Heap). None of them borrow it, so a handle may be stored
//! inside arena memory or captured by a deferred callback.

use std::fmt;

/// Identifies an arena within a [`Heap`](crate::Heap).
///
/// Generation-scoped: once the arena is destroyed its slot may be reused by
/// a new arena with a higher generation, and the old id stops resolving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ArenaId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Index of an individually allocated heap block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location of an allocation's first payload byte.
///
/// The eight bytes immediately preceding `offset` inside `block` hold the
/// allocation header, whatever class the allocation belongs to. That is
/// what lets [`Heap::capacity`](crate::Heap::capacity) and
/// [`Heap::free`](crate::Heap::free) dispatch without being told the class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct Ptr {
    pub(crate) block: BlockId,
    pub(crate) offset: u32,
}

impl Ptr {
    pub(crate) fn new(block: BlockId, offset: u32) -> Self {
        Self { block, offset }
    }

    /// The heap block this allocation lives in.
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Byte offset of the payload within its block.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Byte offset of the header word within the block.
    pub(crate) fn header_offset(&self) -> usize {
        self.offset as usize - crate::header::HEADER_SIZE
    }
}

impl fmt::Display for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ptr(block={}, off={})", self.block, self.offset)
    }
}

/// Index of a registration in an arena's defer table.
///
/// Slot indices, not references, are the stable handle: the table may be
/// reallocated as it grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeferSlot(pub(crate) u32);

impl DeferSlot {
    /// Raw table index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A deferred callback coupled with its own payload allocation.
///
/// Returned by [`Heap::defer_alloc`](crate::Heap::defer_alloc). Cancelling
/// consumes the handle, so a registration cannot be cancelled twice.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Deferred {
    pub(crate) ptr: Ptr,
    pub(crate) slot: DeferSlot,
}

impl Deferred {
    /// The payload allocation handed to the callback.
    pub fn ptr(&self) -> Ptr {
        self.ptr
    }

    /// The registration slot.
    pub fn slot(&self) -> DeferSlot {
        self.slot
    }
}
