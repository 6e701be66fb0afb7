// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
bit tricks for sizes and alignments.
*/

/// Smallest internal dimension of a non-screen image.
pub const INTERNAL_IMAGE_MIN: u32 = 16;

/// Rounds `x` up to a power of two.  `0` and `1` both round to `1`.
pub const fn next_pow2(x: u32) -> u32 {
    if x <= 1 {
        return 1;
    }
    x.next_power_of_two()
}

/// Same as [next_pow2] for `usize` lengths.
pub const fn next_pow2_usize(x: usize) -> usize {
    if x <= 1 {
        return 1;
    }
    x.next_power_of_two()
}

/// The allocation envelope for a logical image dimension: `max(16, next_pow2(n))`.
pub const fn internal_image_size(n: u32) -> u32 {
    let p = next_pow2(n);
    if p < INTERNAL_IMAGE_MIN {
        INTERNAL_IMAGE_MIN
    } else {
        p
    }
}

/// Rounds `value` up to a multiple of `alignment`, which must be a power of two.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
