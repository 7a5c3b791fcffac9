//! Individually allocated heap blocks.
//!
//! A [`BlockTable`] is the stand-in for the process heap: every block is one
//! owned byte buffer whose first [`HEADER_SIZE`] bytes hold the allocation
//! header. Blocks owned by an arena also carry `prev`/`next` links so the
//! arena can walk and release them at teardown and unlink any one of them
//! in O(1).

use crate::error::ArenaError;
use crate::handle::{ArenaId, BlockId, Ptr};
use crate::header::{self, SmallHeader, HEADER_SIZE};

/// One heap block and its list links.
pub(crate) struct Block {
    /// Header word followed by the payload.
    data: Vec<u8>,
    /// Arena whose big list this block is linked into, `None` for loose blocks.
    owner: Option<ArenaId>,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

/// Slab of heap blocks with index reuse and byte accounting.
pub(crate) struct BlockTable {
    blocks: Vec<Option<Block>>,
    /// Indices of released blocks available for reuse.
    free_list: Vec<u32>,
    live_blocks: usize,
    live_bytes: usize,
    byte_limit: Option<usize>,
}

impl BlockTable {
    pub(crate) fn new(byte_limit: Option<usize>) -> Self {
        Self {
            blocks: Vec::new(),
            free_list: Vec::new(),
            live_blocks: 0,
            live_bytes: 0,
            byte_limit,
        }
    }

    /// Allocate a block with `capacity` payload bytes and stamp its header.
    ///
    /// Fresh buffers are zero-filled. Nothing is mutated on failure.
    pub(crate) fn alloc(
        &mut self,
        capacity: usize,
        owner: Option<ArenaId>,
    ) -> Result<Ptr, ArenaError> {
        let total = capacity
            .checked_add(HEADER_SIZE)
            .ok_or(ArenaError::OutOfMemory {
                requested: capacity,
            })?;
        if let Some(limit) = self.byte_limit {
            if self.live_bytes.saturating_add(total) > limit {
                return Err(ArenaError::OutOfMemory { requested: total });
            }
        }
        if self.free_list.is_empty() && self.blocks.len() >= u32::MAX as usize {
            return Err(ArenaError::OutOfMemory { requested: total });
        }

        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| ArenaError::OutOfMemory { requested: total })?;
        data.resize(total, 0);
        header::write_word(&mut data, 0, SmallHeader::Active { capacity }.encode());

        let block = Block {
            data,
            owner,
            prev: None,
            next: None,
        };
        let index = match self.free_list.pop() {
            Some(index) => {
                self.blocks[index as usize] = Some(block);
                index
            }
            None => {
                self.blocks.push(Some(block));
                (self.blocks.len() - 1) as u32
            }
        };
        self.live_blocks += 1;
        self.live_bytes += total;
        Ok(Ptr::new(BlockId(index), HEADER_SIZE as u32))
    }

    /// Drop a block's buffer and make its index reusable.
    ///
    /// The caller must have unlinked it from any arena list first.
    pub(crate) fn release(&mut self, id: BlockId) {
        let Some(slot) = self.blocks.get_mut(id.0 as usize) else {
            debug_assert!(false, "release of unknown block {id}");
            return;
        };
        let Some(block) = slot.take() else {
            debug_assert!(false, "double release of block {id}");
            return;
        };
        self.live_blocks -= 1;
        self.live_bytes -= block.data.len();
        self.free_list.push(id.0);
    }

    fn block(&self, id: BlockId) -> &Block {
        match self.blocks.get(id.0 as usize) {
            Some(Some(block)) => block,
            _ => panic!("dangling block handle {id}"),
        }
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        match self.blocks.get_mut(id.0 as usize) {
            Some(Some(block)) => block,
            _ => panic!("dangling block handle {id}"),
        }
    }

    /// Whether `id` names a live block.
    #[cfg(test)]
    pub(crate) fn contains(&self, id: BlockId) -> bool {
        matches!(self.blocks.get(id.0 as usize), Some(Some(_)))
    }

    /// Whole buffer of a block, header included.
    ///
    /// # Panics
    ///
    /// Panics if the block has been released.
    pub(crate) fn data(&self, id: BlockId) -> &[u8] {
        &self.block(id).data
    }

    /// Mutable whole buffer of a block, header included.
    ///
    /// # Panics
    ///
    /// Panics if the block has been released.
    pub(crate) fn data_mut(&mut self, id: BlockId) -> &mut [u8] {
        &mut self.block_mut(id).data
    }

    pub(crate) fn owner(&self, id: BlockId) -> Option<ArenaId> {
        self.block(id).owner
    }

    /// Hand a block to another owner. The caller keeps the big lists in
    /// step.
    pub(crate) fn set_owner(&mut self, id: BlockId, owner: Option<ArenaId>) {
        self.block_mut(id).owner = owner;
    }

    /// Decode the header preceding `ptr`.
    pub(crate) fn header(&self, ptr: Ptr) -> SmallHeader {
        SmallHeader::decode(header::read_word(self.data(ptr.block), ptr.header_offset()))
    }

    /// Overwrite the header preceding `ptr`.
    pub(crate) fn set_header(&mut self, ptr: Ptr, value: SmallHeader) {
        let at = ptr.header_offset();
        header::write_word(self.data_mut(ptr.block), at, value.encode());
    }

    /// Copy `len` bytes from `src` to `dst`, which may share a block.
    pub(crate) fn copy(&mut self, src: Ptr, dst: Ptr, len: usize) {
        let s = src.offset as usize;
        let d = dst.offset as usize;
        if src.block == dst.block {
            self.data_mut(src.block).copy_within(s..s + len, d);
            return;
        }
        let (a, b) = (src.block.0 as usize, dst.block.0 as usize);
        let (from, to) = if a < b {
            let (lo, hi) = self.blocks.split_at_mut(b);
            (&lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.blocks.split_at_mut(a);
            (&hi[0], &mut lo[b])
        };
        match (from, to) {
            (Some(from), Some(to)) => to.data[d..d + len].copy_from_slice(&from.data[s..s + len]),
            _ => panic!("copy between dangling blocks {} and {}", src.block, dst.block),
        }
    }

    /// Link `id` at the front of the list starting at `head`, returning the
    /// new head.
    pub(crate) fn link_front(&mut self, head: Option<BlockId>, id: BlockId) -> Option<BlockId> {
        {
            let block = self.block_mut(id);
            block.prev = None;
            block.next = head;
        }
        if let Some(h) = head {
            self.block_mut(h).prev = Some(id);
        }
        Some(id)
    }

    /// Unlink `id` from the list starting at `head`, returning the new head.
    pub(crate) fn unlink(&mut self, head: Option<BlockId>, id: BlockId) -> Option<BlockId> {
        let (prev, next) = {
            let block = self.block_mut(id);
            let links = (block.prev, block.next);
            block.prev = None;
            block.next = None;
            links
        };
        debug_assert!(prev.is_none_or(|p| self.block(p).next == Some(id)));
        debug_assert!(next.is_none_or(|n| self.block(n).prev == Some(id)));
        if let Some(n) = next {
            self.block_mut(n).prev = prev;
        }
        match prev {
            Some(p) => {
                self.block_mut(p).next = next;
                head
            }
            None => {
                debug_assert_eq!(head, Some(id));
                next
            }
        }
    }

    pub(crate) fn next(&self, id: BlockId) -> Option<BlockId> {
        self.block(id).next
    }

    #[cfg(test)]
    pub(crate) fn prev(&self, id: BlockId) -> Option<BlockId> {
        self.block(id).prev
    }

    /// Number of live blocks.
    pub(crate) fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    /// Bytes held by live blocks, headers included.
    pub(crate) fn live_bytes(&self) -> usize {
        self.live_bytes
    }
}
