//! Arena configuration parameters.

use crate::error::ArenaError;
use crate::header::{HEADER_SIZE, MAX_OFFSET};
use crate::size_class::LARGEST_SIZE_CLASS;

/// Largest page or storage size whose blocks stay addressable.
const MAX_REGION_SIZE: usize = MAX_OFFSET - HEADER_SIZE;

/// Configuration shared by every arena in a [`Heap`](crate::Heap).
///
/// Validated at construction; all values are immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Size of the first page an arena acquires once its storage block is
    /// exhausted. Later pages double from here.
    ///
    /// Default: 512. Must be a power of two and no larger than
    /// `max_page_size`.
    pub first_page_size: usize,

    /// Upper bound for the doubling page growth target.
    ///
    /// Default: 4096. Must exceed the largest small size class (448), so
    /// that every fresh page can hold at least one block of any class, and
    /// stay below 2 GiB so small-block offsets fit the header word.
    pub max_page_size: usize,

    /// Bytes allocated for an arena's own storage block, which doubles as
    /// its first bump page.
    ///
    /// Default: 512. Must be a multiple of 8, larger than the biggest
    /// small payload (440) so a child's storage is a block of its own, and
    /// below 2 GiB.
    pub storage_size: usize,

    /// Cap on the total bytes held by live heap blocks. Allocations that
    /// would exceed it fail with [`ArenaError::OutOfMemory`].
    ///
    /// Default: `None` (unlimited).
    pub byte_limit: Option<usize>,
}

impl ArenaConfig {
    /// Default first page size in bytes.
    pub const DEFAULT_FIRST_PAGE_SIZE: usize = 512;

    /// Default page size cap in bytes.
    pub const DEFAULT_MAX_PAGE_SIZE: usize = 4096;

    /// Default arena storage block size in bytes.
    pub const DEFAULT_STORAGE_SIZE: usize = 512;

    /// Create a config with default page sizes and no byte limit.
    pub fn new() -> Self {
        Self {
            first_page_size: Self::DEFAULT_FIRST_PAGE_SIZE,
            max_page_size: Self::DEFAULT_MAX_PAGE_SIZE,
            storage_size: Self::DEFAULT_STORAGE_SIZE,
            byte_limit: None,
        }
    }

    /// Same as [`ArenaConfig::new`] with a byte limit applied.
    pub fn with_byte_limit(limit: usize) -> Self {
        Self {
            byte_limit: Some(limit),
            ..Self::new()
        }
    }

    /// Check the invariants documented on each field.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.max_page_size <= LARGEST_SIZE_CLASS {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "max_page_size must exceed the largest size class {LARGEST_SIZE_CLASS} (got {})",
                    self.max_page_size,
                ),
            });
        }
        if !self.first_page_size.is_power_of_two() || self.first_page_size > self.max_page_size {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "first_page_size must be a power of two and <= max_page_size (got {})",
                    self.first_page_size,
                ),
            });
        }
        if self.max_page_size > MAX_REGION_SIZE {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "max_page_size must not exceed {MAX_REGION_SIZE} (got {})",
                    self.max_page_size,
                ),
            });
        }
        if self.storage_size <= LARGEST_SIZE_CLASS - HEADER_SIZE
            || self.storage_size > MAX_REGION_SIZE
        {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "storage_size must be in {}..={MAX_REGION_SIZE} (got {})",
                    LARGEST_SIZE_CLASS - HEADER_SIZE + 1,
                    self.storage_size,
                ),
            });
        }
        if self.storage_size % 8 != 0 {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "storage_size must be a multiple of 8 (got {})",
                    self.storage_size,
                ),
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new()
    }
}
