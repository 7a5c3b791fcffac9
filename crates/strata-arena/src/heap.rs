//! The heap: owner of every block and every arena.
//!
//! [`Heap`] classifies each request. With no arena the request becomes a
//! standalone block; with an arena it goes to the small-object allocator
//! when it fits a size class and to the big-object allocator otherwise.
//! All three classes keep their capacity in the header word preceding the
//! payload, so capacity queries, reallocation and freeing never need to be
//! told which class a pointer came from.

use bytemuck::Pod;
use tracing::warn;

use crate::arena::ArenaTable;
use crate::block::BlockTable;
use crate::config::ArenaConfig;
use crate::error::ArenaError;
use crate::handle::{ArenaId, Ptr};
use crate::header::SmallHeader;
use crate::small::MAX_SMALL_CAPACITY;

/// Counters describing what a [`Heap`] currently holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live heap blocks: standalone allocations, big allocations, pages and
    /// arena storage blocks.
    pub blocks: usize,
    /// Bytes held by those blocks, headers included.
    pub bytes: usize,
    /// Arenas that have not been destroyed.
    pub arenas: usize,
}

/// Bump state of an arena's current page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageUsage {
    /// First byte of the page.
    pub page: Ptr,
    /// Bytes handed out from the page so far.
    pub pos: usize,
    /// Page size in bytes.
    pub size: usize,
}

/// Owner of all arena and standalone memory.
///
/// Single-threaded: a `Heap` is neither `Send` nor `Sync`, because deferred
/// callbacks are arbitrary non-`Send` closures.
///
/// Dropping the heap destroys every arena that is not held by a parent,
/// newest first, so deferred callbacks always run.
pub struct Heap {
    config: ArenaConfig,
    pub(crate) blocks: BlockTable,
    pub(crate) arenas: ArenaTable,
}

impl Heap {
    /// Create a heap with the default configuration.
    pub fn new() -> Self {
        Self::build(ArenaConfig::new())
    }

    /// Create a heap with a validated custom configuration.
    pub fn with_config(config: ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ArenaConfig) -> Self {
        Self {
            blocks: BlockTable::new(config.byte_limit),
            arenas: ArenaTable::new(),
            config,
        }
    }

    /// The configuration this heap was built with.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Allocate `count` elements of `size` bytes without clearing them.
    ///
    /// Fresh memory reads as zero; a block reused from a free list keeps
    /// whatever its previous owner left behind.
    pub fn alloc_uninit(
        &mut self,
        arena: Option<ArenaId>,
        size: usize,
        count: usize,
    ) -> Result<Ptr, ArenaError> {
        let capacity = size
            .checked_mul(count)
            .ok_or(ArenaError::SizeOverflow { size, count })?;
        let result = match arena {
            None => self.blocks.alloc(capacity, None),
            Some(id) if capacity <= MAX_SMALL_CAPACITY => self.alloc_small(id, capacity),
            Some(id) => self.alloc_big(id, capacity),
        };
        if let Err(err) = &result {
            warn!(arena = ?arena, capacity, %err, "allocation failed");
        }
        result
    }

    /// Allocate `count` zeroed elements of `size` bytes.
    pub fn alloc(
        &mut self,
        arena: Option<ArenaId>,
        size: usize,
        count: usize,
    ) -> Result<Ptr, ArenaError> {
        let ptr = self.alloc_uninit(arena, size, count)?;
        self.bytes_mut(ptr).fill(0);
        Ok(ptr)
    }

    /// Allocate `count` elements of `size` bytes copied from `src`, or
    /// zeroed when `src` is `None`.
    pub fn alloc_copy(
        &mut self,
        arena: Option<ArenaId>,
        size: usize,
        count: usize,
        src: Option<&[u8]>,
    ) -> Result<Ptr, ArenaError> {
        let ptr = self.alloc_uninit(arena, size, count)?;
        let dst = self.bytes_mut(ptr);
        match src {
            Some(src) => {
                debug_assert_eq!(src.len(), dst.len(), "source length mismatch");
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
                dst[n..].fill(0);
            }
            None => dst.fill(0),
        }
        Ok(ptr)
    }

    /// Copy a string into a new allocation whose capacity is its byte
    /// length.
    pub fn alloc_str(&mut self, arena: Option<ArenaId>, s: &str) -> Result<Ptr, ArenaError> {
        self.alloc_copy(arena, 1, s.len(), Some(s.as_bytes()))
    }

    /// Copy one plain-data value into a new allocation.
    pub fn alloc_value<T: Pod>(&mut self, arena: Option<ArenaId>, value: &T) -> Result<Ptr, ArenaError> {
        self.alloc_copy(
            arena,
            std::mem::size_of::<T>(),
            1,
            Some(bytemuck::bytes_of(value)),
        )
    }

    /// Copy a slice of plain-data values into a new allocation.
    pub fn alloc_slice<T: Pod>(
        &mut self,
        arena: Option<ArenaId>,
        values: &[T],
    ) -> Result<Ptr, ArenaError> {
        self.alloc_copy(
            arena,
            std::mem::size_of::<T>(),
            values.len(),
            Some(bytemuck::cast_slice(values)),
        )
    }

    /// Usable bytes of an allocation; 0 for `None`.
    pub fn capacity(&self, ptr: Option<Ptr>) -> usize {
        let Some(ptr) = ptr else {
            return 0;
        };
        match self.blocks.header(ptr) {
            SmallHeader::Active { capacity } => capacity,
            SmallHeader::Free { .. } => {
                debug_assert!(false, "capacity of freed allocation {ptr}");
                0
            }
        }
    }

    /// Grow an allocation to hold `count` elements of `size` bytes.
    ///
    /// Returns the same pointer when its capacity already suffices.
    /// Otherwise moves the data into a block of at least twice the old
    /// capacity, frees the old block and returns the new pointer; on
    /// failure the old allocation is untouched. A `None` pointer behaves
    /// like a fresh allocation, except that a zero count yields `None`.
    pub fn realloc(
        &mut self,
        arena: Option<ArenaId>,
        ptr: Option<Ptr>,
        size: usize,
        count: usize,
    ) -> Result<Option<Ptr>, ArenaError> {
        if ptr.is_none() && count == 0 {
            return Ok(None);
        }
        let total = size
            .checked_mul(count)
            .ok_or(ArenaError::SizeOverflow { size, count })?;
        self.reserve(arena, ptr, total).map(Some)
    }

    /// [`Heap::realloc`] in bytes, always yielding an allocation.
    pub(crate) fn reserve(
        &mut self,
        arena: Option<ArenaId>,
        ptr: Option<Ptr>,
        total: usize,
    ) -> Result<Ptr, ArenaError> {
        let Some(old) = ptr else {
            return self.alloc_uninit(arena, 1, total);
        };
        let capacity = self.capacity(Some(old));
        if total <= capacity {
            return Ok(old);
        }
        let new_capacity = capacity.saturating_mul(2).max(total);
        let new = self.alloc_uninit(arena, 1, new_capacity)?;
        self.blocks.copy(old, new, capacity);
        self.free(arena, Some(old));
        Ok(new)
    }

    /// Return an allocation to wherever it came from. No-op for `None`.
    ///
    /// `arena` must be the arena the allocation was made from (`None` for
    /// standalone blocks).
    pub fn free(&mut self, arena: Option<ArenaId>, ptr: Option<Ptr>) {
        let Some(ptr) = ptr else {
            return;
        };
        match arena {
            None => {
                debug_assert_eq!(self.blocks.owner(ptr.block), None, "arena block {ptr} freed as standalone");
                self.blocks.release(ptr.block);
            }
            Some(id) => {
                let capacity = self.capacity(Some(ptr));
                if capacity <= MAX_SMALL_CAPACITY {
                    self.free_small(id, ptr, capacity);
                } else {
                    self.free_big(id, ptr);
                }
            }
        }
    }

    /// Payload bytes of an allocation, `capacity` long.
    ///
    /// # Panics
    ///
    /// Panics if the block holding `ptr` has been released.
    pub fn bytes(&self, ptr: Ptr) -> &[u8] {
        let start = ptr.offset as usize;
        let end = start + self.capacity(Some(ptr));
        &self.blocks.data(ptr.block)[start..end]
    }

    /// Mutable payload bytes of an allocation, `capacity` long.
    ///
    /// # Panics
    ///
    /// Panics if the block holding `ptr` has been released.
    pub fn bytes_mut(&mut self, ptr: Ptr) -> &mut [u8] {
        let start = ptr.offset as usize;
        let end = start + self.capacity(Some(ptr));
        &mut self.blocks.data_mut(ptr.block)[start..end]
    }

    /// Read element `index` of an allocation viewed as `[T]`.
    ///
    /// # Panics
    ///
    /// Panics if the element lies beyond the allocation's capacity.
    pub fn read<T: Pod>(&self, ptr: Ptr, index: usize) -> T {
        let size = std::mem::size_of::<T>();
        let at = index * size;
        bytemuck::pod_read_unaligned(&self.bytes(ptr)[at..at + size])
    }

    /// Write element `index` of an allocation viewed as `[T]`.
    ///
    /// # Panics
    ///
    /// Panics if the element lies beyond the allocation's capacity.
    pub fn write<T: Pod>(&mut self, ptr: Ptr, index: usize, value: &T) {
        let size = std::mem::size_of::<T>();
        let at = index * size;
        self.bytes_mut(ptr)[at..at + size].copy_from_slice(bytemuck::bytes_of(value));
    }

    /// View an allocation made by [`Heap::alloc_str`] as a string.
    pub fn str_at(&self, ptr: Ptr) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.bytes(ptr))
    }

    /// Current block, byte and arena counts.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            blocks: self.blocks.live_blocks(),
            bytes: self.blocks.live_bytes(),
            arenas: self.arenas.live_count(),
        }
    }

    /// Bump state of `arena`'s current page.
    pub fn page_usage(&self, arena: ArenaId) -> Result<PageUsage, ArenaError> {
        let state = self.arena(arena)?;
        Ok(PageUsage {
            page: state.page,
            pos: state.pos,
            size: state.size,
        })
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for id in self.arenas.unowned_newest_first() {
            if self.is_live(id) {
                self.destroy(Some(id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn standalone_allocations_skip_arenas() {
        let mut heap = Heap::new();
        let p = heap.alloc(None, 4, 3).unwrap();
        assert_eq!(heap.capacity(Some(p)), 12);
        assert_eq!(heap.stats().blocks, 1);
        heap.free(None, Some(p));
        assert_eq!(heap.stats(), HeapStats::default());
    }

    #[test]
    fn capacity_of_none_is_zero() {
        let heap = Heap::new();
        assert_eq!(heap.capacity(None), 0);
    }

    #[test]
    fn size_overflow_is_reported() {
        let mut heap = Heap::new();
        let err = heap.alloc(None, usize::MAX, 2).unwrap_err();
        assert!(matches!(err, ArenaError::SizeOverflow { .. }));
    }

    #[test]
    fn alloc_zeroes_reused_block() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let p = heap.alloc_copy(Some(a), 1, 8, Some(&[7u8; 8][..])).unwrap();
        heap.free(Some(a), Some(p));
        let q = heap.alloc(Some(a), 1, 8).unwrap();
        assert_eq!(q, p);
        assert!(heap.bytes(q).iter().all(|&b| b == 0));
    }

    #[test]
    fn alloc_copy_without_source_zeroes() {
        let mut heap = Heap::new();
        let p = heap.alloc_copy(None, 2, 5, None).unwrap();
        assert_eq!(heap.bytes(p), &[0; 10]);
    }

    #[test]
    fn typed_round_trip() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let p = heap.alloc_slice(Some(a), &[1.5f32, -2.0, 3.25]).unwrap();
        assert_eq!(heap.capacity(Some(p)), 12);
        assert_eq!(heap.read::<f32>(p, 2), 3.25);
        heap.write(p, 0, &9.0f32);
        assert_eq!(heap.read::<f32>(p, 0), 9.0);

        let v = heap.alloc_value(Some(a), &0xdead_beef_u32).unwrap();
        assert_eq!(heap.read::<u32>(v, 0), 0xdead_beef);
    }

    #[test]
    fn strings_keep_exact_length() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let p = heap.alloc_str(Some(a), "RootNode").unwrap();
        assert_eq!(heap.capacity(Some(p)), 8);
        assert_eq!(heap.str_at(p).unwrap(), "RootNode");
    }

    #[test]
    fn realloc_within_capacity_is_noop() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let p = heap.alloc(Some(a), 1, 100).unwrap();
        assert_eq!(heap.realloc(Some(a), Some(p), 1, 100).unwrap(), Some(p));
        assert_eq!(heap.realloc(Some(a), Some(p), 1, 10).unwrap(), Some(p));
        assert_eq!(heap.realloc(Some(a), Some(p), 1, 0).unwrap(), Some(p));
    }

    #[test]
    fn realloc_null_cases() {
        let mut heap = Heap::new();
        assert_eq!(heap.realloc(None, None, 8, 0).unwrap(), None);
        let p = heap.realloc(None, None, 8, 2).unwrap().unwrap();
        assert_eq!(heap.capacity(Some(p)), 16);
    }

    #[test]
    fn realloc_doubles_and_preserves_prefix() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        let p = heap.alloc_copy(Some(a), 1, 4, Some(&b"abcd"[..])).unwrap();
        let q = heap.realloc(Some(a), Some(p), 1, 5).unwrap().unwrap();
        assert_ne!(q, p);
        assert_eq!(heap.capacity(Some(q)), 8);
        assert_eq!(&heap.bytes(q)[..4], b"abcd");

        let r = heap.realloc(Some(a), Some(q), 1, 1000).unwrap().unwrap();
        assert_eq!(heap.capacity(Some(r)), 1000);
        assert_eq!(&heap.bytes(r)[..4], b"abcd");
    }

    #[test]
    fn realloc_failure_keeps_old_allocation() {
        let mut heap = Heap::with_config(ArenaConfig::with_byte_limit(2000)).unwrap();
        let p = heap.alloc_copy(None, 1, 1000, Some(&[3u8; 1000][..])).unwrap();
        assert!(heap.realloc(None, Some(p), 1, 1500).is_err());
        assert_eq!(heap.capacity(Some(p)), 1000);
        assert!(heap.bytes(p).iter().all(|&b| b == 3));
    }

    #[test]
    fn operations_on_destroyed_arena_fail() {
        let mut heap = Heap::new();
        let a = heap.create(None).unwrap();
        heap.destroy(Some(a));
        assert_eq!(
            heap.alloc(Some(a), 1, 8).unwrap_err(),
            ArenaError::TornDown { arena: a }
        );
        assert!(heap.defer(a, |_| {}).is_err());
        assert!(heap.page_usage(a).is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ArenaConfig {
            max_page_size: 100,
            ..ArenaConfig::new()
        };
        assert!(Heap::with_config(config).is_err());
    }

    #[test]
    fn drop_runs_pending_callbacks() {
        let count = Rc::new(Cell::new(0));
        {
            let mut heap = Heap::new();
            let root = heap.create(None).unwrap();
            let child = heap.create(Some(root)).unwrap();
            let other = heap.create(None).unwrap();
            for arena in [root, child, other] {
                let count = Rc::clone(&count);
                heap.defer(arena, move |_| count.set(count.get() + 1)).unwrap();
            }
        }
        assert_eq!(count.get(), 3);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn capacity_covers_request(
                sizes in proptest::collection::vec(0usize..5000, 1..50),
            ) {
                let mut heap = Heap::new();
                let a = heap.create(None).unwrap();
                for &n in &sizes {
                    let p = heap.alloc_uninit(Some(a), 1, n).unwrap();
                    prop_assert!(heap.capacity(Some(p)) >= n);
                    prop_assert_eq!(heap.capacity(Some(p)), heap.capacity(Some(p)));
                }
            }

            #[test]
            fn growth_preserves_prefix(k in 1usize..600, extra in 1usize..2000) {
                let mut heap = Heap::new();
                let a = heap.create(None).unwrap();
                let data: Vec<u8> = (0..k).map(|i| (i % 251) as u8).collect();
                let p = heap.alloc_copy(Some(a), 1, k, Some(&data)).unwrap();
                let q = heap.realloc(Some(a), Some(p), 1, k + extra).unwrap().unwrap();
                prop_assert!(heap.capacity(Some(q)) >= k + extra);
                prop_assert_eq!(&heap.bytes(q)[..k], &data[..]);
            }
        }
    }
}
