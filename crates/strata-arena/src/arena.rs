//! Arena control blocks and lifecycle.
//!
//! An arena's bookkeeping lives in the heap's generational [`ArenaTable`].
//! Its *storage block* is a real allocation of `storage_size` bytes that
//! doubles as the first bump page: taken from the parent arena when there
//! is one, from the heap otherwise, or supplied by the caller
//! ([`Heap::init`]).
//!
//! A child registers exactly one "destroy me" action with its parent. The
//! parent either runs it during its own teardown, or the child cancels it
//! (without running) when it is destroyed first.

use tracing::debug;

use crate::defer::{DeferAction, DeferTable};
use crate::error::ArenaError;
use crate::handle::{ArenaId, BlockId, DeferSlot, Ptr};
use crate::header;
use crate::heap::Heap;
use crate::size_class::NUM_SIZE_CLASSES;

/// Lifecycle phase of a live table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Live,
    /// Deferred callbacks are running. Allocation and registration are
    /// still allowed; a second destroy is not.
    TearingDown,
}

/// Bookkeeping for one arena.
pub(crate) struct ArenaState {
    pub(crate) phase: Phase,
    /// Creation order, used to tear down leftover roots newest-first.
    pub(crate) seq: u64,
    pub(crate) storage: Ptr,
    /// Whether teardown frees `storage` (false for [`Heap::init`]).
    pub(crate) owns_storage: bool,

    /// Current bump page: payload start, cursor and size in bytes.
    pub(crate) page: Ptr,
    pub(crate) pos: usize,
    pub(crate) size: usize,
    /// Growth target of the last page; the next page doubles it.
    pub(crate) next_size: usize,

    pub(crate) parent: Option<ArenaId>,
    pub(crate) parent_slot: Option<DeferSlot>,

    pub(crate) free_lists: [Option<Ptr>; NUM_SIZE_CLASSES],
    pub(crate) big_head: Option<BlockId>,
    pub(crate) defers: DeferTable,
}

struct ArenaEntry {
    generation: u32,
    state: Option<ArenaState>,
}

/// Generational slot table of arena control blocks.
pub(crate) struct ArenaTable {
    entries: Vec<ArenaEntry>,
    free_list: Vec<u32>,
    next_seq: u64,
}

impl ArenaTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn get(&self, id: ArenaId) -> Result<&ArenaState, ArenaError> {
        self.entries
            .get(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.state.as_ref())
            .ok_or(ArenaError::TornDown { arena: id })
    }

    pub(crate) fn get_mut(&mut self, id: ArenaId) -> Result<&mut ArenaState, ArenaError> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.state.as_mut())
            .ok_or(ArenaError::TornDown { arena: id })
    }

    /// Store a new control block whose first page is `storage`.
    pub(crate) fn insert(
        &mut self,
        storage: Ptr,
        storage_len: usize,
        owns_storage: bool,
        parent: Option<ArenaId>,
        first_page_size: usize,
    ) -> ArenaId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let state = ArenaState {
            phase: Phase::Live,
            seq,
            storage,
            owns_storage,
            page: storage,
            pos: 0,
            size: storage_len,
            next_size: first_page_size / 2,
            parent,
            parent_slot: None,
            free_lists: [None; NUM_SIZE_CLASSES],
            big_head: None,
            defers: DeferTable::new(),
        };
        match self.free_list.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.state = Some(state);
                ArenaId::new(index, entry.generation)
            }
            None => {
                self.entries.push(ArenaEntry {
                    generation: 0,
                    state: Some(state),
                });
                ArenaId::new((self.entries.len() - 1) as u32, 0)
            }
        }
    }

    /// Take the control block out, invalidating `id`.
    pub(crate) fn remove(&mut self, id: ArenaId) -> Option<ArenaState> {
        let entry = self
            .entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)?;
        let state = entry.state.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_list.push(id.index);
        Some(state)
    }

    /// Live arenas not held by any parent registration, newest first.
    pub(crate) fn unowned_newest_first(&self) -> Vec<ArenaId> {
        let mut roots: Vec<(u64, ArenaId)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                let state = e.state.as_ref()?;
                (state.parent_slot.is_none() && state.phase == Phase::Live)
                    .then(|| (state.seq, ArenaId::new(i as u32, e.generation)))
            })
            .collect();
        roots.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        roots.into_iter().map(|(_, id)| id).collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.state.is_some()).count()
    }
}

impl Heap {
    /// Create an arena, optionally as a child of `parent`.
    ///
    /// The storage block comes from the parent's allocator, or from the
    /// heap for a root arena. A child is torn down automatically when its
    /// parent is. On failure nothing stays allocated.
    pub fn create(&mut self, parent: Option<ArenaId>) -> Result<ArenaId, ArenaError> {
        let storage_size = self.config().storage_size;
        let storage = self.alloc_uninit(parent, 1, storage_size)?;
        match self.attach(storage, true, parent) {
            Ok(id) => Ok(id),
            Err(err) => {
                self.free(parent, Some(storage));
                Err(err)
            }
        }
    }

    /// Create an arena whose storage block is the caller-owned `storage`.
    ///
    /// The whole capacity of `storage` becomes the first bump page. The
    /// arena never frees `storage`; the caller keeps ownership of it and
    /// must keep it alive for the arena's lifetime. Storage reaching past
    /// 2 GiB into its block is rejected.
    pub fn init(&mut self, storage: Ptr, parent: Option<ArenaId>) -> Result<ArenaId, ArenaError> {
        let offset = storage.offset() as usize;
        let capacity = self.capacity(Some(storage));
        if !header::page_fits(offset, capacity) {
            return Err(ArenaError::StorageTooLarge { offset, capacity });
        }
        self.attach(storage, false, parent)
    }

    fn attach(
        &mut self,
        storage: Ptr,
        owns_storage: bool,
        parent: Option<ArenaId>,
    ) -> Result<ArenaId, ArenaError> {
        if let Some(p) = parent {
            self.arena(p)?;
        }
        let storage_len = self.capacity(Some(storage));
        let first_page_size = self.config().first_page_size;
        let id = self
            .arenas
            .insert(storage, storage_len, owns_storage, parent, first_page_size);

        if let Some(p) = parent {
            let registered = self
                .arena_mut(p)
                .and_then(|ps| ps.defers.register(DeferAction::DestroyChild(id)));
            match registered {
                Ok(slot) => {
                    if let Ok(state) = self.arena_mut(id) {
                        state.parent_slot = Some(slot);
                    }
                }
                Err(err) => {
                    self.arenas.remove(id);
                    return Err(err);
                }
            }
        }
        debug!(arena = %id, parent = ?parent, owns_storage, "arena created");
        Ok(id)
    }

    /// Destroy an arena. No-op for `None`.
    ///
    /// Runs every deferred callback newest-first (child arenas included),
    /// releases every big block still linked, detaches from the parent and
    /// finally frees the storage block if the arena owns it.
    ///
    /// Destroying an arena twice, or from one of its own callbacks, is a
    /// programmer error caught by a debug assertion.
    pub fn destroy(&mut self, arena: Option<ArenaId>) {
        let Some(id) = arena else {
            return;
        };
        match self.arenas.get_mut(id) {
            Ok(state) if state.phase == Phase::Live => state.phase = Phase::TearingDown,
            _ => {
                debug_assert!(false, "arena {id} destroyed twice");
                return;
            }
        }
        debug!(arena = %id, "destroying arena");

        while let Some(action) = self
            .arenas
            .get_mut(id)
            .ok()
            .and_then(|state| state.defers.pop_active())
        {
            self.run_deferred(action);
        }

        let Some(state) = self.arenas.remove(id) else {
            return;
        };
        let mut released = 0usize;
        let mut cursor = state.big_head;
        while let Some(block) = cursor {
            cursor = self.blocks.next(block);
            self.blocks.release(block);
            released += 1;
        }

        if let (Some(parent), Some(slot)) = (state.parent, state.parent_slot) {
            if let Ok(ps) = self.arenas.get_mut(parent) {
                // dropped without running
                let _ = ps.defers.cancel(slot);
            }
        }
        if state.owns_storage {
            match state.parent {
                Some(parent) if self.is_live(parent) => self.free(Some(parent), Some(state.storage)),
                Some(parent) => {
                    debug_assert!(false, "child {id} outlived parent {parent} without detaching");
                }
                None => self.free(None, Some(state.storage)),
            }
        }
        debug!(arena = %id, big_blocks = released, "arena destroyed");
    }

    /// Whether `arena` still resolves (live or mid-teardown).
    pub fn is_live(&self, arena: ArenaId) -> bool {
        self.arenas.get(arena).is_ok()
    }

    /// Parent of `arena`, if it was created as a child.
    pub fn parent(&self, arena: ArenaId) -> Result<Option<ArenaId>, ArenaError> {
        Ok(self.arena(arena)?.parent)
    }

    pub(crate) fn arena(&self, id: ArenaId) -> Result<&ArenaState, ArenaError> {
        self.arenas.get(id)
    }

    pub(crate) fn arena_mut(&mut self, id: ArenaId) -> Result<&mut ArenaState, ArenaError> {
        self.arenas.get_mut(id)
    }
}
