//! Static size-class tables for the small-object allocator.
//!
//! Small requests (header included) are rounded up to a multiple of
//! [`QUANTUM`] and mapped to one of [`NUM_SIZE_CLASSES`] fixed block sizes.

/// Rounding granularity in bytes.
pub const QUANTUM: usize = 8;

/// Block sizes in units of [`QUANTUM`].
const CLASS_UNITS: [u8; 10] = [2, 3, 4, 6, 10, 14, 18, 26, 34, 56];

/// Number of small size classes.
pub const NUM_SIZE_CLASSES: usize = CLASS_UNITS.len();

/// Largest small block in bytes, header included. Anything bigger takes
/// the big-object path.
pub const LARGEST_SIZE_CLASS: usize = 448;

/// Owning class for each quantized size `0..=56`.
const SIZE_TO_CLASS: [u8; LARGEST_SIZE_CLASS / QUANTUM + 1] = [
    0, 0, 0, 1, 2, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 6, 6, 6, 6, //
    7, 7, 7, 7, 7, 7, 7, 7, 8, 8, 8, 8, 8, 8, 8, 8, 9, 9, 9, //
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
];

/// Size class owning a block of `total` bytes (header included).
///
/// # Panics
///
/// Panics if `total` exceeds [`LARGEST_SIZE_CLASS`].
pub fn class_of(total: usize) -> usize {
    let quantized = total.div_ceil(QUANTUM);
    SIZE_TO_CLASS[quantized] as usize
}

/// Fixed block size in bytes of `class`.
pub fn class_size(class: usize) -> usize {
    CLASS_UNITS[class] as usize * QUANTUM
}
