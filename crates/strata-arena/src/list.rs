//! Growable lists backed by arena allocations.
//!
//! An [`AList`] is just a `(data, count)` pair. The backing capacity is not
//! stored in the list: it is read from the allocation header, and growth
//! goes through [`Heap::realloc`], so pushing is amortised O(1).

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::error::ArenaError;
use crate::handle::{ArenaId, Ptr};
use crate::heap::Heap;

/// A list of plain-data values living in heap or arena memory.
///
/// The list does not remember its arena; every growing call takes the one
/// it was first pushed with.
#[derive(Debug)]
pub struct AList<T> {
    data: Option<Ptr>,
    count: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> AList<T> {
    /// An empty list with no backing allocation.
    pub const fn new() -> Self {
        Self {
            data: None,
            count: 0,
            _marker: PhantomData,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the list holds no elements.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Backing allocation, if any element was ever pushed.
    pub fn data(&self) -> Option<Ptr> {
        self.data
    }

    /// Elements that fit without reallocating.
    pub fn capacity(&self, heap: &Heap) -> usize {
        match std::mem::size_of::<T>() {
            0 => usize::MAX,
            size => heap.capacity(self.data) / size,
        }
    }

    fn grow(&mut self, heap: &mut Heap, arena: Option<ArenaId>, n: usize) -> Result<Ptr, ArenaError> {
        let size = std::mem::size_of::<T>();
        let count = self
            .count
            .checked_add(n)
            .ok_or(ArenaError::SizeOverflow { size, count: n })?;
        let total = size
            .checked_mul(count)
            .ok_or(ArenaError::SizeOverflow { size, count })?;
        let ptr = heap.reserve(arena, self.data, total)?;
        self.data = Some(ptr);
        Ok(ptr)
    }

    /// Append one element, returning its index.
    pub fn push(&mut self, heap: &mut Heap, arena: Option<ArenaId>, item: T) -> Result<usize, ArenaError> {
        let ptr = self.grow(heap, arena, 1)?;
        let index = self.count;
        heap.write(ptr, index, &item);
        self.count += 1;
        Ok(index)
    }

    /// Append `n` elements copied from `items`, or zeroed when `items` is
    /// `None`. Returns the index of the first new element.
    pub fn push_n(
        &mut self,
        heap: &mut Heap,
        arena: Option<ArenaId>,
        n: usize,
        items: Option<&[T]>,
    ) -> Result<usize, ArenaError> {
        if n == 0 {
            return Ok(self.count);
        }
        let ptr = self.grow(heap, arena, n)?;
        let index = self.count;
        let size = std::mem::size_of::<T>();
        let dst = &mut heap.bytes_mut(ptr)[index * size..(index + n) * size];
        match items {
            Some(items) => {
                debug_assert_eq!(items.len(), n, "push_n item count mismatch");
                let src: &[u8] = bytemuck::cast_slice(items);
                let len = src.len().min(dst.len());
                dst[..len].copy_from_slice(&src[..len]);
                dst[len..].fill(0);
            }
            None => dst.fill(0),
        }
        self.count += n;
        Ok(index)
    }

    /// Remove and return the last element.
    pub fn pop(&mut self, heap: &Heap) -> Option<T> {
        debug_assert!(self.count > 0, "pop from empty list");
        let ptr = self.data?;
        self.count = self.count.checked_sub(1)?;
        Some(heap.read(ptr, self.count))
    }

    /// Remove and return the last `n` elements, in list order.
    pub fn pop_n(&mut self, heap: &Heap, n: usize) -> Option<Vec<T>> {
        debug_assert!(self.count >= n, "pop_n past the start of the list");
        let start = self.count.checked_sub(n)?;
        let popped = match self.data {
            Some(ptr) => (start..self.count).map(|i| heap.read(ptr, i)).collect(),
            None => Vec::new(),
        };
        self.count = start;
        Some(popped)
    }

    /// Remove element `index` by moving the last element into its place.
    ///
    /// O(1) but does not preserve order. Returns `false` for an index out
    /// of range.
    pub fn remove_at(&mut self, heap: &mut Heap, index: usize) -> bool {
        debug_assert!(index < self.count, "remove_at({index}) on list of {}", self.count);
        let Some(ptr) = self.data.filter(|_| index < self.count) else {
            return false;
        };
        let last = self.count - 1;
        if index != last {
            let moved: T = heap.read(ptr, last);
            heap.write(ptr, index, &moved);
        }
        self.count = last;
        true
    }

    /// Element `index`, if in range.
    pub fn get(&self, heap: &Heap, index: usize) -> Option<T> {
        let ptr = self.data.filter(|_| index < self.count)?;
        Some(heap.read(ptr, index))
    }

    /// Overwrite element `index`. Returns `false` for an index out of range.
    pub fn set(&mut self, heap: &mut Heap, index: usize, item: T) -> bool {
        let Some(ptr) = self.data.filter(|_| index < self.count) else {
            return false;
        };
        heap.write(ptr, index, &item);
        true
    }

    /// Copy the elements out into a `Vec`.
    pub fn to_vec(&self, heap: &Heap) -> Vec<T> {
        match self.data {
            Some(ptr) => (0..self.count).map(|i| heap.read(ptr, i)).collect(),
            None => Vec::new(),
        }
    }

    /// Release the backing allocation.
    pub fn free(self, heap: &mut Heap, arena: Option<ArenaId>) {
        heap.free(arena, self.data);
    }
}

impl<T: Pod> Default for AList<T> {
    fn default() -> Self {
        Self::new()
    }
}
