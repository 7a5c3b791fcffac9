//! Big-object allocator.
//!
//! Requests too large for any size class get a heap block of their own,
//! linked at the head of the owning arena's big list. Pages for the small
//! allocator are big blocks too.

use tracing::trace;

use crate::error::ArenaError;
use crate::handle::{ArenaId, Ptr};
use crate::heap::Heap;

impl Heap {
    pub(crate) fn alloc_big(&mut self, id: ArenaId, capacity: usize) -> Result<Ptr, ArenaError> {
        // resolve first so a stale id never leaks a block
        self.arenas.get(id)?;
        let ptr = self.blocks.alloc(capacity, Some(id))?;
        let state = self.arenas.get_mut(id)?;
        state.big_head = self.blocks.link_front(state.big_head, ptr.block);
        Ok(ptr)
    }

    pub(crate) fn free_big(&mut self, id: ArenaId, ptr: Ptr) {
        debug_assert_eq!(
            self.blocks.owner(ptr.block),
            Some(id),
            "big block {ptr} freed through the wrong arena"
        );
        let Ok(state) = self.arenas.get_mut(id) else {
            debug_assert!(false, "free into torn-down arena {id}");
            return;
        };
        state.big_head = self.blocks.unlink(state.big_head, ptr.block);
        self.blocks.release(ptr.block);
        trace!(arena = %id, block = %ptr.block, "big block released");
    }

    /// Walk the big list of `arena` from the most recent block.
    ///
    /// Small-allocator pages and child storage blocks are included.
    pub fn big_blocks(&self, arena: ArenaId) -> Result<impl Iterator<Item = Ptr> + '_, ArenaError> {
        let head = self.arena(arena)?.big_head;
        Ok(std::iter::successors(head, |&b| self.blocks.next(b))
            .map(|b| Ptr::new(b, crate::header::HEADER_SIZE as u32)))
    }
}
