//! The wait block `W`: a stack-allocated queue node belonging to exactly
//! one waiting thread.
//!
//! Lifecycle: constructed on the waiting thread's stack, linked into the
//! queue under the queue spinlock, unlinked by either the waking thread or
//! by the waiter's own cleanup, and dropped only after the waiter has
//! observed its own unblock. The waiting thread's stack frame does not
//! return until that has happened, which is what gives every pointer the
//! queue or a waker holds into `W` a sufficient lifetime.

use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

/// Which acquisition class a waiter belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Class {
    Exclusive,
    Shared,
}

/// A queue node, intrusive-linked via raw pointers into other threads'
/// stack frames. Every pointer stored here is only ever dereferenced while
/// the queue spinlock is held, and only ever points at a `WaitBlock` that
/// has not yet observed `spinning == false`.
#[repr(align(8))]
pub struct WaitBlock {
    pub class: Class,
    pub thread: Thread,
    pub prev: Cell<*const WaitBlock>,
    pub next: Cell<*const WaitBlock>,
    /// The rendezvous flag. `true` while the waiter might still be spinning
    /// or about to park; cleared to `false` by whichever of {waiter, waker}
    /// gets there first. See `crate::park` for the protocol this implements.
    spinning: AtomicBool,
}

// SAFETY: the `prev`/`next` pointers are only ever read or written while
// the owning `WaitQueue`'s spinlock is held, which gives them the
// exclusion they need to be shared across the thread that enqueues this
// block and the thread that eventually walks the queue to wake it.
unsafe impl Send for WaitBlock {}
unsafe impl Sync for WaitBlock {}

impl WaitBlock {
    pub fn new(class: Class) -> Self {
        Self {
            class,
            thread: thread::current(),
            prev: Cell::new(ptr::null()),
            next: Cell::new(ptr::null()),
            spinning: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn is_spinning(&self, order: Ordering) -> bool {
        self.spinning.load(order)
    }

    /// Clears the spinning flag and returns its value from just before the
    /// clear. Used by both the waiter (in `park::block`) and the waker (in
    /// `park::unblock`) — whichever call observes `true` here is the one
    /// that must perform the actual OS-level park/unpark.
    #[inline]
    pub fn take_spinning(&self, order: Ordering) -> bool {
        self.spinning.swap(false, order)
    }

    #[inline]
    pub fn as_ptr(&self) -> *const WaitBlock {
        self as *const WaitBlock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_spinning_is_exactly_once() {
        let w = WaitBlock::new(Class::Exclusive);
        assert!(w.is_spinning(Ordering::Relaxed));
        assert!(w.take_spinning(Ordering::Relaxed));
        assert!(!w.is_spinning(Ordering::Relaxed));
        assert!(!w.take_spinning(Ordering::Relaxed));
    }
}
