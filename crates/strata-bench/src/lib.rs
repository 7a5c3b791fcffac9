//! Benchmark workloads and utilities for strata-arena.
//!
//! Provides deterministic generators shared by the criterion benches and
//! the integration tests:
//!
//! - [`SizeStream`]: seeded stream of allocation sizes in a range
//! - [`build_scene`]: allocates a synthetic scene graph into an arena tree

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use strata_arena::{AList, ArenaError, ArenaId, Heap, Ptr};

/// Deterministic stream of sizes in `[min, max]`.
///
/// A 64-bit LCG; the same seed always yields the same sequence.
#[derive(Clone, Debug)]
pub struct SizeStream {
    state: u64,
    min: usize,
    max: usize,
}

impl SizeStream {
    /// Create a stream over `[min, max]` (inclusive).
    pub fn new(seed: u64, min: usize, max: usize) -> Self {
        assert!(min <= max, "empty size range {min}..={max}");
        Self {
            state: seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407),
            min,
            max,
        }
    }

    /// Next raw 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        // high bits have the longest period
        self.state >> 33
    }
}

impl Iterator for SizeStream {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let span = (self.max - self.min) as u64 + 1;
        Some(self.min + (self.next_u64() % span) as usize)
    }
}

/// Handles produced by [`build_scene`].
#[derive(Debug)]
pub struct Scene {
    /// Root arena owning everything below.
    pub root: ArenaId,
    /// One child arena per mesh.
    pub meshes: Vec<ArenaId>,
    /// Node names, allocated in the root arena.
    pub names: Vec<Ptr>,
    /// Vertex index lists, one per mesh, allocated in the mesh arena.
    pub indices: Vec<AList<u32>>,
}

/// Allocate a synthetic scene: `nodes` named nodes in a root arena and one
/// child arena per mesh holding `indices_per_mesh` vertex indices.
pub fn build_scene(
    heap: &mut Heap,
    nodes: usize,
    meshes: usize,
    indices_per_mesh: usize,
) -> Result<Scene, ArenaError> {
    let root = heap.create(None)?;
    let mut names = Vec::with_capacity(nodes);
    for i in 0..nodes {
        names.push(heap.alloc_str(Some(root), &format!("node_{i}"))?);
    }
    let mut mesh_arenas = Vec::with_capacity(meshes);
    let mut indices = Vec::with_capacity(meshes);
    for _ in 0..meshes {
        let mesh = heap.create(Some(root))?;
        let mut list = AList::new();
        for i in 0..indices_per_mesh {
            list.push(heap, Some(mesh), i as u32)?;
        }
        mesh_arenas.push(mesh);
        indices.push(list);
    }
    Ok(Scene {
        root,
        meshes: mesh_arenas,
        names,
        indices,
    })
}
