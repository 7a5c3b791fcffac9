//! Deferred-callback registry.
//!
//! Each arena owns a [`DeferTable`]: one growable slot table threaded by two
//! index-linked lists. Active registrations form a doubly-linked list with
//! the most recent registration at the head; released slots form a
//! singly-linked free list through `next`. A slot is on exactly one of the
//! two lists at any time, and holds an action only while it is active.
//!
//! Teardown repeatedly unlinks the head and runs it, which yields LIFO order
//! and also picks up registrations made by a callback that is running.

use smallvec::SmallVec;
use tracing::trace;

use crate::error::ArenaError;
use crate::handle::{ArenaId, DeferSlot, Deferred, Ptr};
use crate::header::HEADER_SIZE;
use crate::heap::Heap;

/// Boxed deferred callback. Receives the heap so it can free memory,
/// destroy other arenas or register further work.
pub type DeferFn = Box<dyn FnOnce(&mut Heap)>;

/// What a slot runs when triggered.
pub(crate) enum DeferAction {
    /// User-supplied callback.
    Callback(DeferFn),
    /// Tear down a child arena created under this one.
    DestroyChild(ArenaId),
}

struct DeferEntry {
    action: Option<DeferAction>,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Slot table backing one arena's registrations.
pub(crate) struct DeferTable {
    slots: SmallVec<[DeferEntry; 4]>,
    active_head: Option<u32>,
    free_head: Option<u32>,
}

impl DeferTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: SmallVec::new(),
            active_head: None,
            free_head: None,
        }
    }

    /// Link `action` at the head of the active list, reusing a free slot
    /// when one exists.
    pub(crate) fn register(&mut self, action: DeferAction) -> Result<DeferSlot, ArenaError> {
        let slot = match self.free_head {
            Some(slot) => {
                self.free_head = self.slots[slot as usize].next;
                slot
            }
            None => {
                if self.slots.len() >= u32::MAX as usize {
                    return Err(ArenaError::OutOfMemory {
                        requested: std::mem::size_of::<DeferEntry>(),
                    });
                }
                self.slots
                    .try_reserve(1)
                    .map_err(|_| ArenaError::OutOfMemory {
                        requested: std::mem::size_of::<DeferEntry>(),
                    })?;
                self.slots.push(DeferEntry {
                    action: None,
                    prev: None,
                    next: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let head = self.active_head;
        let entry = &mut self.slots[slot as usize];
        entry.action = Some(action);
        entry.prev = None;
        entry.next = head;
        if let Some(h) = head {
            self.slots[h as usize].prev = Some(slot);
        }
        self.active_head = Some(slot);
        Ok(DeferSlot(slot))
    }

    fn is_active(&self, slot: DeferSlot) -> bool {
        self.slots
            .get(slot.index())
            .is_some_and(|e| e.action.is_some())
    }

    /// Unlink an active slot, push it on the free list and hand back its
    /// action. Returns `None` for a slot that is not active.
    pub(crate) fn cancel(&mut self, slot: DeferSlot) -> Option<DeferAction> {
        if !self.is_active(slot) {
            debug_assert!(false, "cancel of inactive defer slot {}", slot.index());
            return None;
        }
        let index = slot.0;
        let (prev, next) = {
            let entry = &self.slots[index as usize];
            (entry.prev, entry.next)
        };
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.active_head = next,
        }
        if let Some(n) = next {
            self.slots[n as usize].prev = prev;
        }

        let free_head = self.free_head;
        let entry = &mut self.slots[index as usize];
        let action = entry.action.take();
        entry.prev = None;
        entry.next = free_head;
        self.free_head = Some(index);
        action
    }

    /// Swap the action of an active slot in place, returning the old one.
    pub(crate) fn reassign(&mut self, slot: DeferSlot, action: DeferAction) -> Option<DeferAction> {
        if !self.is_active(slot) {
            debug_assert!(false, "reassign of inactive defer slot {}", slot.index());
            return None;
        }
        self.slots[slot.index()].action.replace(action)
    }

    /// Unlink and return the most recent registration.
    pub(crate) fn pop_active(&mut self) -> Option<DeferAction> {
        let head = self.active_head?;
        self.cancel(DeferSlot(head))
    }

    /// Active slots from most to least recently registered.
    pub(crate) fn active(&self) -> impl Iterator<Item = DeferSlot> + '_ {
        std::iter::successors(self.active_head, |&s| self.slots[s as usize].next).map(DeferSlot)
    }

    /// Number of slots ever created (active and free).
    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl Heap {
    /// Register `f` to run when `arena` is destroyed.
    ///
    /// Callbacks run in reverse registration order. The returned slot is
    /// the handle for [`Heap::cancel`] and [`Heap::reassign`].
    pub fn defer(
        &mut self,
        arena: ArenaId,
        f: impl FnOnce(&mut Heap) + 'static,
    ) -> Result<DeferSlot, ArenaError> {
        self.arena_mut(arena)?
            .defers
            .register(DeferAction::Callback(Box::new(f)))
    }

    /// Remove a registration so it will not run at teardown.
    ///
    /// With `run_now`, the callback runs immediately after being unlinked.
    /// Cancelling a child arena's registration detaches the child: it is
    /// no longer torn down with this arena and becomes a root arena that
    /// owns its storage block outright.
    pub fn cancel(&mut self, arena: ArenaId, slot: DeferSlot, run_now: bool) {
        let Ok(state) = self.arena_mut(arena) else {
            debug_assert!(false, "cancel on torn-down arena {arena}");
            return;
        };
        let Some(action) = state.defers.cancel(slot) else {
            return;
        };
        if let DeferAction::DestroyChild(child) = &action {
            self.detach_child(*child);
        }
        if run_now {
            self.run_deferred(action);
        }
    }

    /// Replace the callback held by an active slot without changing its
    /// position in the teardown order.
    pub fn reassign(&mut self, arena: ArenaId, slot: DeferSlot, f: impl FnOnce(&mut Heap) + 'static) {
        let Ok(state) = self.arena_mut(arena) else {
            debug_assert!(false, "reassign on torn-down arena {arena}");
            return;
        };
        if let Some(DeferAction::DestroyChild(child)) =
            state.defers.reassign(slot, DeferAction::Callback(Box::new(f)))
        {
            self.detach_child(child);
        }
    }

    /// Allocate a `size`-byte payload in `arena` and register `f` to run on
    /// it at teardown.
    ///
    /// The payload is copied from `data`, or zeroed when `data` is `None`.
    /// The payload stays allocated until it is freed explicitly or the arena
    /// is destroyed; the callback runs before the arena releases its memory.
    pub fn defer_alloc(
        &mut self,
        arena: ArenaId,
        size: usize,
        data: Option<&[u8]>,
        f: impl FnOnce(&mut Heap, Ptr) + 'static,
    ) -> Result<Deferred, ArenaError> {
        let ptr = self.alloc_copy(Some(arena), 1, size, data)?;
        match self.defer(arena, move |heap| f(heap, ptr)) {
            Ok(slot) => Ok(Deferred { ptr, slot }),
            Err(err) => {
                self.free(Some(arena), Some(ptr));
                Err(err)
            }
        }
    }

    /// Cancel a [`Deferred`] registration, keeping its payload allocated.
    ///
    /// Returns the payload so the caller can keep using or free it.
    pub fn cancel_retain(&mut self, arena: ArenaId, deferred: Deferred, run_now: bool) -> Ptr {
        self.cancel(arena, deferred.slot, run_now);
        deferred.ptr
    }

    /// Cancel a [`Deferred`] registration and free its payload.
    pub fn cancel_deferred(&mut self, arena: ArenaId, deferred: Deferred, run_now: bool) {
        let ptr = self.cancel_retain(arena, deferred, run_now);
        self.free(Some(arena), Some(ptr));
    }

    /// Active registrations of `arena`, most recent first.
    pub fn deferred_slots(&self, arena: ArenaId) -> Result<Vec<DeferSlot>, ArenaError> {
        Ok(self.arena(arena)?.defers.active().collect())
    }

    pub(crate) fn run_deferred(&mut self, action: DeferAction) {
        match action {
            DeferAction::Callback(f) => f(self),
            DeferAction::DestroyChild(child) => {
                trace!(%child, "tearing down child arena");
                // the slot is already unlinked; the child must not cancel it
                if let Ok(state) = self.arena_mut(child) {
                    state.parent_slot = None;
                }
                self.destroy(Some(child));
            }
        }
    }

    /// Cut `child` loose from its parent so it outlives the parent's
    /// teardown.
    ///
    /// A storage block the child took from its parent moves off the
    /// parent's big list and becomes a standalone block, freed when the
    /// child is destroyed.
    fn detach_child(&mut self, child: ArenaId) {
        let Ok(state) = self.arena_mut(child) else {
            return;
        };
        state.parent_slot = None;
        let (storage, owns_storage) = (state.storage, state.owns_storage);
        let Some(parent) = state.parent else {
            return;
        };

        if owns_storage {
            let block = storage.block();
            let own_block = storage.offset() as usize == HEADER_SIZE
                && self.blocks.owner(block) == Some(parent);
            if !own_block {
                debug_assert!(false, "storage {storage} of {child} is not a block of {parent}");
                return;
            }
            if let Ok(ps) = self.arenas.get_mut(parent) {
                ps.big_head = self.blocks.unlink(ps.big_head, block);
            }
            self.blocks.set_owner(block, None);
        }
        if let Ok(state) = self.arena_mut(child) {
            state.parent = None;
        }
        trace!(%child, %parent, "child arena detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(n: u32) -> DeferAction {
        DeferAction::DestroyChild(ArenaId::new(n, 0))
    }

    fn child_index(action: Option<DeferAction>) -> Option<u32> {
        match action {
            Some(DeferAction::DestroyChild(id)) => Some(id.index),
            _ => None,
        }
    }

    #[test]
    fn active_list_is_lifo() {
        let mut table = DeferTable::new();
        for n in 0..3 {
            table.register(child(n)).unwrap();
        }
        let order: Vec<usize> = table.active().map(|s| s.index()).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert_eq!(child_index(table.pop_active()), Some(2));
        assert_eq!(child_index(table.pop_active()), Some(1));
        assert_eq!(child_index(table.pop_active()), Some(0));
        assert!(table.pop_active().is_none());
    }

    #[test]
    fn cancel_any_position_keeps_links() {
        for victim in 0..3u32 {
            let mut table = DeferTable::new();
            let slots: Vec<DeferSlot> = (0..3).map(|n| table.register(child(n)).unwrap()).collect();
            assert_eq!(child_index(table.cancel(slots[victim as usize])), Some(victim));
            let remaining: Vec<u32> = table.active().map(|s| s.0).collect();
            let expected: Vec<u32> = (0..3).rev().filter(|&n| n != victim).collect();
            assert_eq!(remaining, expected);
        }
    }

    #[test]
    fn freed_slots_are_reused_before_growing() {
        let mut table = DeferTable::new();
        let a = table.register(child(0)).unwrap();
        let b = table.register(child(1)).unwrap();
        table.cancel(a);
        table.cancel(b);
        // free list is b -> a
        assert_eq!(table.register(child(2)).unwrap(), b);
        assert_eq!(table.register(child(3)).unwrap(), a);
        assert_eq!(table.slot_count(), 2);
    }

    #[test]
    fn reassign_keeps_position() {
        let mut table = DeferTable::new();
        let a = table.register(child(0)).unwrap();
        table.register(child(1)).unwrap();
        let old = table.reassign(a, child(9));
        assert_eq!(child_index(old), Some(0));
        let order: Vec<usize> = table.active().map(|s| s.index()).collect();
        assert_eq!(order, vec![1, 0]);
        table.pop_active();
        assert_eq!(child_index(table.pop_active()), Some(9));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn active_and_free_partition_slots(
                ops in proptest::collection::vec(any::<(bool, u8)>(), 1..64),
            ) {
                let mut table = DeferTable::new();
                let mut live: Vec<DeferSlot> = Vec::new();
                for (n, &(register, pick)) in ops.iter().enumerate() {
                    if register || live.is_empty() {
                        live.push(table.register(child(n as u32)).unwrap());
                    } else {
                        let victim = live.remove(pick as usize % live.len());
                        prop_assert!(table.cancel(victim).is_some());
                    }
                }
                let active: Vec<DeferSlot> = table.active().collect();
                prop_assert_eq!(active.len(), live.len());
                for slot in &live {
                    prop_assert!(active.contains(slot));
                }
                let free = std::iter::successors(table.free_head, |&s| table.slots[s as usize].next).count();
                prop_assert_eq!(free + active.len(), table.slot_count());
            }
        }
    }
}
