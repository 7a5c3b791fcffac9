//! Hierarchical region allocation for scene construction.
//!
//! Allocation-heavy builders (for example turning a parsed file into an
//! in-memory scene graph) allocate many small records and never free most
//! of them individually. An arena hands those out from bump pages, recycles
//! freed small blocks through per-size-class free lists, and releases
//! everything at once when it is destroyed.
//!
//! # Architecture
//!
//! ```text
//! Heap (owns every block and every arena)
//! ├── BlockTable: individually allocated blocks
//! │   ├── standalone blocks (no arena)
//! │   └── big blocks, linked per arena (big allocations, pages, child storage)
//! └── ArenaTable: generational control blocks
//!     ├── current bump page + growth target
//!     ├── free list head per size class
//!     ├── big-list head
//!     └── DeferTable (LIFO callbacks, including "destroy child arena")
//! ```
//!
//! # Allocation classes
//!
//! - **Standalone:** `arena = None`. One block per allocation, freed directly.
//! - **Small:** payload plus header fits the largest size class (448 bytes).
//!   Carved from the arena's current page; freed blocks are reused by class.
//! - **Big:** anything larger. One block per allocation, linked into the
//!   arena's big list and released at teardown if not freed earlier.
//!
//! Every allocation is preceded by an 8-byte header recording its capacity,
//! so [`Heap::capacity`], [`Heap::realloc`] and [`Heap::free`] work on any
//! [`Ptr`] regardless of class.
//!
//! # Teardown
//!
//! [`Heap::destroy`] runs the arena's deferred callbacks newest-first, then
//! releases its big blocks, then returns its storage block to its parent (or
//! the heap). Child arenas are deferred callbacks of their parent, so a
//! whole tree goes down with its root.
//!
//! # Example
//!
//! ```
//! use strata_arena::{AList, Heap};
//!
//! let mut heap = Heap::new();
//! let scene = heap.create(None)?;
//! let meshes = heap.create(Some(scene))?;
//!
//! let name = heap.alloc_str(Some(scene), "Cube")?;
//! let mut indices = AList::new();
//! for i in 0..36u32 {
//!     indices.push(&mut heap, Some(meshes), i)?;
//! }
//! assert_eq!(heap.str_at(name)?, "Cube");
//! assert_eq!(indices.len(), 36);
//!
//! // tears down `meshes` too
//! heap.destroy(Some(scene));
//! assert_eq!(heap.stats().blocks, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

mod arena;
mod big;
mod block;
pub mod config;
pub mod defer;
pub mod error;
pub mod handle;
pub mod header;
pub mod heap;
pub mod list;
pub mod size_class;
mod small;

// Public re-exports for the primary API surface.
pub use config::ArenaConfig;
pub use defer::DeferFn;
pub use error::ArenaError;
pub use handle::{ArenaId, BlockId, DeferSlot, Deferred, Ptr};
pub use heap::{Heap, HeapStats, PageUsage};
pub use list::AList;
