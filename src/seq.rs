//! Sequence-number comparison in wrap-around (mod 2^32) space.
//!
//! Two sequence numbers are comparable when they are less than `2^31` apart,
//! which always holds for a window bounded by a 16-bit advertisement.  Raw
//! integer comparison must never be used on sequence numbers.

/// `a` strictly precedes `b`.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `a` precedes or equals `b`.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

/// `a` strictly follows `b`.
#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    seq_lt(b, a)
}

/// `lo <= x <= hi` in sequence space.
#[inline]
pub fn seq_between(lo: u32, x: u32, hi: u32) -> bool {
    seq_le(lo, x) && seq_le(x, hi)
}
