//! Bit-pattern arithmetic shared by the update and merge engines
//!
//! The occupied-level bit pattern `P` doubles as a binary counter: filling
//! the base buffer increments it by one, and the bits that flip during that
//! increment are exactly the levels touched by the resulting carry
//! propagation (see [`super::sketch`]).

/// Position of the highest set bit, or `None` if `value == 0`.
pub fn highest_set_bit(value: u64) -> Option<u32> {
    if value == 0 {
        None
    } else {
        Some(63 - value.leading_zeros())
    }
}

/// Position of the lowest set bit, or `None` if `value == 0`.
pub fn lowest_set_bit(value: u64) -> Option<u32> {
    if value == 0 {
        None
    } else {
        Some(value.trailing_zeros())
    }
}

/// Number of occupied levels encoded in `pattern`.
pub fn occupied_levels(pattern: u64) -> u32 {
    pattern.count_ones()
}

/// Bits that flip when incrementing a binary counter from `before` to `after`.
///
/// The lowest set bit of the result is always bit 0: filling the base
/// buffer always attempts to settle a carry starting at level 0, whether
/// or not level 0 turns out to already be occupied.
pub fn changed_bits(before: u64, after: u64) -> u64 {
    before ^ after
}
