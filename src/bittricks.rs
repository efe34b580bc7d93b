// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
alignment arithmetic.

Everything here works on power-of-two alignments, which is all the hardware ever asks for.
*/

/// Constant blocks are bound at this granularity.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/**
Rounds `value` up to the next multiple of `alignment`.

`alignment` must be a power of two.
*/
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    value & (alignment - 1) == 0
}

/**
Size a constant block occupies in the constant ring.

0 stays 0, exact multiples of 256 are unchanged, everything else rounds up.
*/
pub const fn align_constant_size(size: u64) -> u64 {
    align_up(size, CONSTANT_BUFFER_ALIGNMENT)
}

/// Rounds `value` down to a multiple of `alignment`.
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}
