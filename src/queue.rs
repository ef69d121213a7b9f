//! The waiter queue: a doubly linked list of [`WaitBlock`]s protected by
//! its own spinlock, independent of the state word.
//!
//! Ordering invariant: exclusive waiters precede shared waiters; within a
//! class, insertion order is preserved. The `first_shared` cursor always
//! names the first shared waiter, or nothing if there is none (this is the
//! "points at the sentinel" case from the design: rather than allocate a
//! literal self-referential sentinel node, an empty list and an empty
//! `first_shared` are both modeled as `None`, which is the natural
//! re-architecture of an intrusive C list in safe-ish Rust).

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::spin::SpinWait;
use crate::wait_block::{Class, WaitBlock};

pub struct WaitQueue {
    locked: AtomicBool,
    head: Cell<Option<NonNull<WaitBlock>>>,
    tail: Cell<Option<NonNull<WaitBlock>>>,
    first_shared: Cell<Option<NonNull<WaitBlock>>>,
}

// SAFETY: every access to the `Cell` fields happens while `locked` is held,
// which gives the queue the exclusion it needs to be shared across threads.
unsafe impl Send for WaitQueue {}
unsafe impl Sync for WaitQueue {}

/// Proof that the caller holds the queue spinlock. Released on drop.
pub struct QueueGuard<'a> {
    queue: &'a WaitQueue,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.queue.locked.store(false, Ordering::Release);
    }
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            head: Cell::new(None),
            tail: Cell::new(None),
            first_shared: Cell::new(None),
        }
    }

    /// Acquires the auxiliary spinlock. Never parks: this lock is only ever
    /// held for a handful of pointer writes.
    pub fn lock(&self) -> QueueGuard<'_> {
        let mut wait = SpinWait::new(crate::spin::recommended_spin_count());
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                wait.spin_only();
            }
        }
        QueueGuard { queue: self }
    }

    pub fn is_empty(&self, _guard: &QueueGuard<'_>) -> bool {
        self.head.get().is_none()
    }

    pub fn head_class(&self, _guard: &QueueGuard<'_>) -> Option<Class> {
        // SAFETY: `head`, when `Some`, points at a `WaitBlock` that is still
        // queued (not yet unblocked), guaranteed by the enqueue/remove
        // protocol below, all performed under this same spinlock.
        unsafe { self.head.get().map(|p| p.as_ref().class) }
    }

    /// Inserts `wb` immediately before the first shared waiter (or at the
    /// tail if there are none): the tail of the exclusive run.
    ///
    /// # Safety
    /// `wb` must outlive the time it spends linked into this queue.
    pub unsafe fn insert_last_exclusive(&self, _guard: &QueueGuard<'_>, wb: &WaitBlock) {
        debug_assert_eq!(wb.class, Class::Exclusive);
        let wb_ptr = NonNull::from(wb);

        match self.first_shared.get() {
            None => self.push_tail(wb_ptr),
            Some(first_shared) => {
                let prev = first_shared.as_ref().prev.get();
                wb.prev.set(prev);
                wb.next.set(first_shared.as_ptr());
                first_shared.as_ref().prev.set(wb_ptr.as_ptr());
                match NonNull::new(prev as *mut WaitBlock) {
                    Some(prev) => prev.as_ref().next.set(wb_ptr.as_ptr()),
                    None => self.head.set(Some(wb_ptr)),
                }
            }
        }
    }

    /// Inserts `wb` at the tail of the whole queue.
    ///
    /// # Safety
    /// `wb` must outlive the time it spends linked into this queue.
    pub unsafe fn insert_last(&self, _guard: &QueueGuard<'_>, wb: &WaitBlock) {
        let wb_ptr = NonNull::from(wb);
        let became_first_shared = match self.tail.get() {
            None => true,
            Some(tail) => tail.as_ref().class == Class::Exclusive,
        };
        self.push_tail(wb_ptr);
        if wb.class == Class::Shared && became_first_shared {
            self.first_shared.set(Some(wb_ptr));
        }
    }

    /// Inserts `wb` at the very head of the queue, overtaking every other
    /// waiter. Used only by shared-to-exclusive conversion.
    ///
    /// # Safety
    /// `wb` must outlive the time it spends linked into this queue.
    pub unsafe fn insert_first(&self, _guard: &QueueGuard<'_>, wb: &WaitBlock) {
        debug_assert_eq!(wb.class, Class::Exclusive);
        let wb_ptr = NonNull::from(wb);
        wb.prev.set(std::ptr::null());
        wb.next.set(self.head.get().map_or(std::ptr::null(), |h| h.as_ptr()));
        match self.head.get() {
            Some(old_head) => old_head.as_ref().prev.set(wb_ptr.as_ptr()),
            None => self.tail.set(Some(wb_ptr)),
        }
        self.head.set(Some(wb_ptr));
        // the converter is exclusive and now at the head, so it can never
        // itself be the first shared waiter.
    }

    unsafe fn push_tail(&self, wb_ptr: NonNull<WaitBlock>) {
        let wb = wb_ptr.as_ref();
        wb.next.set(std::ptr::null());
        wb.prev.set(self.tail.get().map_or(std::ptr::null(), |t| t.as_ptr()));
        match self.tail.get() {
            Some(tail) => tail.as_ref().next.set(wb_ptr.as_ptr()),
            None => self.head.set(Some(wb_ptr)),
        }
        self.tail.set(Some(wb_ptr));
    }

    /// Unlinks `wb` from the queue. Used when a waiter gives up on its own
    /// (re-racing the fast path after the queue-lock CAS failed).
    ///
    /// # Safety
    /// `wb` must currently be linked into this queue.
    pub unsafe fn remove(&self, _guard: &QueueGuard<'_>, wb: &WaitBlock) {
        let wb_ptr = NonNull::from(wb);
        match NonNull::new(wb.prev.get() as *mut WaitBlock) {
            Some(prev) => prev.as_ref().next.set(wb.next.get()),
            None => self.head.set(NonNull::new(wb.next.get() as *mut WaitBlock)),
        }
        match NonNull::new(wb.next.get() as *mut WaitBlock) {
            Some(next) => next.as_ref().prev.set(wb.prev.get()),
            None => self.tail.set(NonNull::new(wb.prev.get() as *mut WaitBlock)),
        }
        if self.first_shared.get() == Some(wb_ptr) {
            self.first_shared.set(self.next_shared_after(wb));
        }
    }

    /// Dequeues the head if it is an exclusive waiter. Returns `None` if
    /// the queue is empty or the head is shared.
    ///
    /// # Safety
    /// The returned reference is only valid until the waiter it points to
    /// observes its own unblock; the caller must unpark it promptly.
    pub unsafe fn pop_exclusive_head(&self, guard: &QueueGuard<'_>) -> Option<NonNull<WaitBlock>> {
        let head = self.head.get()?;
        if head.as_ref().class != Class::Exclusive {
            return None;
        }
        self.remove(guard, head.as_ref());
        Some(head)
    }

    /// Dequeues the contiguous run of shared waiters starting at the head
    /// (or at `first_shared`, for the conversion wake path), stopping at
    /// the first exclusive waiter or the end of the queue. Resets
    /// `first_shared` to empty. Returns the dequeued waiters in order.
    ///
    /// # Safety
    /// Every returned reference is only valid until its waiter observes its
    /// own unblock; the caller must unpark all of them promptly.
    pub unsafe fn pop_shared_run(
        &self,
        guard: &QueueGuard<'_>,
        start_at_first_shared: bool,
    ) -> Vec<NonNull<WaitBlock>> {
        let mut cursor = if start_at_first_shared {
            self.first_shared.get()
        } else {
            self.head.get()
        };

        let mut out = Vec::new();
        while let Some(node) = cursor {
            if node.as_ref().class != Class::Shared {
                break;
            }
            let next = NonNull::new(node.as_ref().next.get() as *mut WaitBlock);
            self.remove(guard, node.as_ref());
            out.push(node);
            cursor = next;
        }
        self.first_shared.set(None);
        out
    }

    /// Per the ordering invariant (exclusive waiters always precede shared
    /// waiters), whatever immediately follows the removed first-shared
    /// waiter is itself shared, if anything follows at all.
    unsafe fn next_shared_after(&self, wb: &WaitBlock) -> Option<NonNull<WaitBlock>> {
        NonNull::new(wb.next.get() as *mut WaitBlock)
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
