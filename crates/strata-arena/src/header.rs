//! The hidden allocation header.
//!
//! Every allocation is preceded by one 8-byte little-endian header word.
//! While a block is live the word records its usable capacity. A freed small
//! block reuses the same word as the link to the next free block of its size
//! class. The two states are modelled as [`SmallHeader`] and encoded
//! explicitly, with the top bit as the tag.

use crate::handle::{BlockId, Ptr};

/// Size of the header word in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest payload offset a header word can link to. Pages and arena
/// storage must end at or below it.
pub const MAX_OFFSET: usize = (1 << 31) - 1;

const FREE_TAG: u64 = 1 << 63;
const NO_BLOCK: u64 = u32::MAX as u64;
const OFFSET_MASK: u64 = MAX_OFFSET as u64;

/// Whether a page of `len` bytes starting at payload `offset` stays
/// addressable.
pub(crate) fn page_fits(offset: usize, len: usize) -> bool {
    offset.checked_add(len).is_some_and(|end| end <= MAX_OFFSET)
}

/// Decoded state of a header word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmallHeader {
    /// Block is handed out; `capacity` usable bytes follow the header.
    Active {
        /// Usable payload bytes.
        capacity: usize,
    },
    /// Block sits on a free list; `next` is the following free block.
    Free {
        /// Next block of the same size class, if any.
        next: Option<Ptr>,
    },
}

impl SmallHeader {
    /// Pack into a header word.
    pub fn encode(self) -> u64 {
        match self {
            Self::Active { capacity } => {
                debug_assert!((capacity as u64) < FREE_TAG);
                capacity as u64
            }
            Self::Free { next: None } => FREE_TAG | NO_BLOCK,
            Self::Free { next: Some(p) } => {
                debug_assert!(u64::from(p.offset) <= OFFSET_MASK);
                FREE_TAG | (u64::from(p.offset) << 32) | u64::from(p.block.0)
            }
        }
    }

    /// Unpack a header word.
    pub fn decode(word: u64) -> Self {
        if word & FREE_TAG == 0 {
            return Self::Active {
                capacity: word as usize,
            };
        }
        let block = word & u64::from(u32::MAX);
        if block == NO_BLOCK {
            return Self::Free { next: None };
        }
        let offset = ((word >> 32) & OFFSET_MASK) as u32;
        Self::Free {
            next: Some(Ptr::new(BlockId(block as u32), offset)),
        }
    }
}

/// Read the header word stored at `at` in `data`.
pub(crate) fn read_word(data: &[u8], at: usize) -> u64 {
    let mut word = [0u8; HEADER_SIZE];
    word.copy_from_slice(&data[at..at + HEADER_SIZE]);
    u64::from_le_bytes(word)
}

/// Store a header word at `at` in `data`.
pub(crate) fn write_word(data: &mut [u8], at: usize, word: u64) {
    data[at..at + HEADER_SIZE].copy_from_slice(&word.to_le_bytes());
}
