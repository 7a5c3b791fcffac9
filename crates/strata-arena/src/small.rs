//! Small-object allocator: bump pages plus per-size-class free lists.
//!
//! A request of `capacity` payload bytes needs `capacity + HEADER_SIZE`
//! bytes, rounded up to its size class. Freed blocks go on the class's free
//! list and are handed out again LIFO; neighbours are never merged.
//!
//! When the current page cannot fit a block, a new page is taken through
//! the big-object path. The new page only replaces the current one if it
//! leaves more room behind; otherwise the old page keeps serving bumps and
//! the new one hosts just the block that triggered it.

use tracing::trace;

use crate::error::ArenaError;
use crate::handle::{ArenaId, Ptr};
use crate::header::{SmallHeader, HEADER_SIZE};
use crate::heap::Heap;
use crate::size_class::{class_of, class_size, LARGEST_SIZE_CLASS};

/// Largest payload that still takes the small path.
pub(crate) const MAX_SMALL_CAPACITY: usize = LARGEST_SIZE_CLASS - HEADER_SIZE;

impl Heap {
    pub(crate) fn alloc_small(&mut self, id: ArenaId, capacity: usize) -> Result<Ptr, ArenaError> {
        debug_assert!(capacity <= MAX_SMALL_CAPACITY);
        let class = class_of(capacity + HEADER_SIZE);
        let state = self.arenas.get_mut(id)?;

        if let Some(head) = state.free_lists[class] {
            let next = match self.blocks.header(head) {
                SmallHeader::Free { next } => next,
                SmallHeader::Active { .. } => {
                    debug_assert!(false, "live block {head} on free list");
                    None
                }
            };
            state.free_lists[class] = next;
            self.blocks.set_header(head, SmallHeader::Active { capacity });
            return Ok(head);
        }

        let chunk = class_size(class);
        if state.size - state.pos >= chunk {
            let at = state.page.offset as usize + state.pos;
            let offset = u32::try_from(at + HEADER_SIZE)
                .map_err(|_| ArenaError::OutOfMemory { requested: chunk })?;
            state.pos += chunk;
            let ptr = Ptr::new(state.page.block, offset);
            self.blocks.set_header(ptr, SmallHeader::Active { capacity });
            return Ok(ptr);
        }

        self.alloc_small_on_new_page(id, chunk, capacity)
    }

    fn alloc_small_on_new_page(
        &mut self,
        id: ArenaId,
        chunk: usize,
        capacity: usize,
    ) -> Result<Ptr, ArenaError> {
        let max_page_size = self.config().max_page_size;
        let state = self.arenas.get(id)?;
        let next_size = (state.next_size * 2).min(max_page_size);
        let page_size = next_size.max(LARGEST_SIZE_CLASS + 1);
        debug_assert!(page_size >= chunk);

        let page = self.alloc_big(id, page_size)?;
        let ptr = Ptr::new(page.block, page.offset + HEADER_SIZE as u32);
        self.blocks.set_header(ptr, SmallHeader::Active { capacity });

        let state = self.arenas.get_mut(id)?;
        state.next_size = next_size;
        let old_left = state.size - state.pos;
        let new_left = page_size - chunk;
        let adopted = new_left > old_left;
        if adopted {
            state.page = page;
            state.pos = chunk;
            state.size = page_size;
        }
        trace!(arena = %id, page_size, old_left, new_left, adopted, "small page acquired");
        Ok(ptr)
    }

    /// Push a small block onto its class's free list.
    pub(crate) fn free_small(&mut self, id: ArenaId, ptr: Ptr, capacity: usize) {
        let class = class_of(capacity + HEADER_SIZE);
        let Ok(state) = self.arenas.get_mut(id) else {
            debug_assert!(false, "free into torn-down arena {id}");
            return;
        };
        let next = state.free_lists[class];
        state.free_lists[class] = Some(ptr);
        self.blocks.set_header(ptr, SmallHeader::Free { next });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn bump_allocations_are_adjacent_chunks() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let p1 = heap.alloc(Some(a), 1, 10).unwrap();
        let p2 = heap.alloc(Some(a), 1, 10).unwrap();
        assert_eq!(p1.block(), p2.block());
        // 10 + 8 header rounds to the 24-byte class
        assert_eq!(p2.offset() - p1.offset(), 24);
        assert_eq!(heap.page_usage(a).unwrap().pos, 48);
    }

    #[test]
    fn freed_block_is_reused_lifo() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let p1 = heap.alloc(Some(a), 1, 30).unwrap();
        let p2 = heap.alloc(Some(a), 1, 30).unwrap();
        heap.free(Some(a), Some(p1));
        heap.free(Some(a), Some(p2));
        let q1 = heap.alloc(Some(a), 1, 26).unwrap();
        let q2 = heap.alloc(Some(a), 1, 40).unwrap();
        assert_eq!(q1, p2);
        assert_eq!(q2, p1);
        assert_eq!(heap.capacity(Some(q1)), 26);
        assert_eq!(heap.capacity(Some(q2)), 40);
    }

    #[test]
    fn free_list_is_per_class() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let small = heap.alloc(Some(a), 1, 8).unwrap();
        heap.free(Some(a), Some(small));
        let other = heap.alloc(Some(a), 1, 100).unwrap();
        assert_ne!(other, small);
    }

    #[test]
    fn page_growth_doubles_up_to_cap() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let mut sizes = Vec::new();
        for _ in 0..200 {
            heap.alloc(Some(a), 1, 400).unwrap();
            let usage = heap.page_usage(a).unwrap();
            if sizes.last() != Some(&usage.size) {
                sizes.push(usage.size);
            }
        }
        assert_eq!(sizes, vec![512, 1024, 2048, 4096]);
    }

    #[test]
    fn new_page_adopted_only_with_more_headroom() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        heap.alloc(Some(a), 1, 440).unwrap();
        let before = heap.page_usage(a).unwrap();
        assert_eq!(before.pos, 448);

        // the new 512-byte page would leave 64 bytes, no more than the
        // 64 already left, so the storage page stays current
        let lone = heap.alloc(Some(a), 1, 440).unwrap();
        assert_ne!(lone.block(), before.page.block());
        assert_eq!(heap.page_usage(a).unwrap(), before);

        let bumped = heap.alloc(Some(a), 1, 40).unwrap();
        assert_eq!(bumped.block(), before.page.block());
        assert_eq!(heap.page_usage(a).unwrap().pos, 496);

        // 16 left; a 1024-byte page leaves 576 and takes over
        heap.alloc(Some(a), 1, 440).unwrap();
        let after = heap.page_usage(a).unwrap();
        assert_eq!(after.size, 1024);
        assert_eq!(after.pos, 448);
        assert_ne!(after.page, before.page);
    }

    #[test]
    fn failed_growth_keeps_bump_state() {
        let mut heap = Heap::with_config(crate::ArenaConfig::with_byte_limit(600)).unwrap();
        let a = heap.create(None).unwrap();
        heap.alloc(Some(a), 1, 440).unwrap();
        let before = heap.page_usage(a).unwrap();
        assert!(heap.alloc(Some(a), 1, 440).is_err());
        assert_eq!(heap.page_usage(a).unwrap(), before);
        // a smaller class still fits the storage page
        assert!(heap.alloc(Some(a), 1, 40).is_ok());
    }

    #[test]
    fn no_block_is_issued_twice() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let mut live = HashSet::new();
        let mut order = Vec::new();
        for i in 0..300usize {
            let p = heap.alloc(Some(a), 1, 8 + (i * 37) % 400).unwrap();
            assert!(live.insert(p), "{p} issued while live");
            order.push(p);
            if i % 3 == 0 {
                let victim = order.swap_remove(i % order.len());
                live.remove(&victim);
                heap.free(Some(a), Some(victim));
            }
        }
    }
}
