//! The packed state word `V` described in the design: a single atomic
//! holding the `Owned` bit, the `Waiters` bit, and the shared-owner count.
//!
//! The fast path only ever touches this word. Every other component
//! (the waiter queue, the queue spinlock, the parking primitive) is only
//! consulted once a fast-path CAS fails.

use std::sync::atomic::{AtomicUsize, Ordering};

pub const OWNED: usize = 0b001;
pub const WAITERS: usize = 0b010;
pub const SHARED_UNIT: usize = 0b100;
pub const SHARED_MASK: usize = !(OWNED | WAITERS);

/// The packed lock state word.
#[repr(transparent)]
pub struct State(AtomicUsize);

impl State {
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> usize {
        self.0.load(order)
    }

    #[inline]
    pub fn compare_exchange_weak(
        &self,
        current: usize,
        new: usize,
        success: Ordering,
        failure: Ordering,
    ) -> Result<usize, usize> {
        self.0.compare_exchange_weak(current, new, success, failure)
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: usize,
        new: usize,
        success: Ordering,
        failure: Ordering,
    ) -> Result<usize, usize> {
        self.0.compare_exchange(current, new, success, failure)
    }

    #[inline]
    pub fn fetch_or(&self, bits: usize, order: Ordering) -> usize {
        self.0.fetch_or(bits, order)
    }

    #[inline]
    pub fn fetch_and(&self, bits: usize, order: Ordering) -> usize {
        self.0.fetch_and(bits, order)
    }
}

#[inline]
pub const fn is_owned(v: usize) -> bool {
    v & OWNED != 0
}

#[inline]
pub const fn has_waiters(v: usize) -> bool {
    v & WAITERS != 0
}

#[inline]
pub const fn shared_count(v: usize) -> usize {
    (v & SHARED_MASK) / SHARED_UNIT
}

#[inline]
pub const fn is_exclusively_held(v: usize) -> bool {
    is_owned(v) && shared_count(v) == 0
}

#[inline]
pub const fn is_shared_held(v: usize) -> bool {
    is_owned(v) && shared_count(v) >= 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_layout_is_disjoint() {
        assert_eq!(OWNED & WAITERS, 0);
        assert_eq!(OWNED & SHARED_MASK, 0);
        assert_eq!(WAITERS & SHARED_MASK, 0);
    }

    #[test]
    fn shared_count_roundtrips() {
        let v = OWNED | 7 * SHARED_UNIT;
        assert!(is_shared_held(v));
        assert!(!is_exclusively_held(v));
        assert_eq!(shared_count(v), 7);
    }

    #[test]
    fn exclusive_has_zero_shared_count() {
        let v = OWNED;
        assert!(is_exclusively_held(v));
        assert_eq!(shared_count(v), 0);
    }
}
