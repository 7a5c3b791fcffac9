//! Arena-specific error types.

use std::error::Error;
use std::fmt;

use crate::handle::ArenaId;

/// Errors that can occur during allocation, registration or arena creation.
///
/// Every fallible entry point reports failure through this type; nothing is
/// retried internally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The backing buffer could not be reserved, or the configured byte
    /// limit would be exceeded.
    OutOfMemory {
        /// Number of bytes requested, header included.
        requested: usize,
    },
    /// `size * count` does not fit in `usize`.
    SizeOverflow {
        /// Element size in bytes.
        size: usize,
        /// Number of elements.
        count: usize,
    },
    /// The arena handle is stale or the arena has already been destroyed.
    TornDown {
        /// The offending handle.
        arena: ArenaId,
    },
    /// Caller-supplied storage extends past the addressable page range.
    StorageTooLarge {
        /// Payload offset of the storage allocation.
        offset: usize,
        /// Its capacity in bytes.
        capacity: usize,
    },
    /// An [`ArenaConfig`](crate::ArenaConfig) failed validation.
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory: requested {requested} bytes")
            }
            Self::SizeOverflow { size, count } => {
                write!(f, "allocation size overflow: {count} elements of {size} bytes")
            }
            Self::TornDown { arena } => write!(f, "arena {arena} has been torn down"),
            Self::StorageTooLarge { offset, capacity } => write!(
                f,
                "arena storage of {capacity} bytes at offset {offset} is not addressable"
            ),
            Self::InvalidConfig { reason } => write!(f, "invalid arena config: {reason}"),
        }
    }
}

impl Error for ArenaError {}
