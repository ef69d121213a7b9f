//! `FairRwLock`: the fair, FIFO reader-writer lock (`spec.md` §4).
//!
//! Combines the packed [`State`](crate::state) word for the owned/waiters/
//! shared-count fast path with the [`WaitQueue`](crate::queue) and
//! [`park`](crate::park) rendezvous for the slow path. Grounded on the
//! teacher's `rwlock/adaptive.rs` for the state transitions and on
//! `mutex/word_lock.rs` for the enqueue/wake shape around an auxiliary
//! spinlock-protected queue.

use std::sync::atomic::Ordering;

use crate::guard::{ExclusiveGuard, ShareGuard};
use crate::owner_track::OwnerTrack;
use crate::park;
use crate::queue::WaitQueue;
use crate::spin::{self, SpinWait};
use crate::state::{self, State};
use crate::wait_block::{Class, WaitBlock};

pub struct FairRwLock {
    state: State,
    queue: WaitQueue,
    spin_count: u32,
    owners: OwnerTrack,
}

impl FairRwLock {
    /// Creates an unlocked lock with the host's recommended spin budget
    /// (`spec.md` §4.5: zero on single-core hosts).
    pub fn new() -> Self {
        Self::with_spin_count(spin::recommended_spin_count())
    }

    pub fn with_spin_count(spin_count: u32) -> Self {
        Self {
            state: State::new(),
            queue: WaitQueue::new(),
            spin_count,
            owners: OwnerTrack::new(),
        }
    }

    pub fn owned(&self) -> bool {
        state::is_owned(self.state.load(Ordering::Relaxed))
    }

    pub fn shared_owners(&self) -> usize {
        state::shared_count(self.state.load(Ordering::Relaxed))
    }

    // ---- exclusive acquire ----------------------------------------------

    pub fn acquire_exclusive(&self) -> ExclusiveGuard<'_> {
        if !self.fast_try_exclusive() {
            self.acquire_exclusive_slow(true);
        }
        self.owners.record_exclusive();
        ExclusiveGuard::new(self)
    }

    pub fn spin_acquire_exclusive(&self) -> ExclusiveGuard<'_> {
        if !self.fast_try_exclusive() {
            self.acquire_exclusive_slow(false);
        }
        self.owners.record_exclusive();
        ExclusiveGuard::new(self)
    }

    pub fn try_acquire_exclusive(&self) -> Option<ExclusiveGuard<'_>> {
        if self.fast_try_exclusive() {
            self.owners.record_exclusive();
            Some(ExclusiveGuard::new(self))
        } else {
            None
        }
    }

    /// Single-attempt CAS: succeeds only when `Owned == 0`. Callers racing
    /// ahead of a queue of waiters ("barging") is allowed here, mirroring
    /// `word_lock::lock_slow`'s style, which always tries to grab an
    /// unlocked word even when a queue already exists.
    fn fast_try_exclusive(&self) -> bool {
        let v = self.state.load(Ordering::Relaxed);
        !state::is_owned(v)
            && self
                .state
                .compare_exchange(v, v | state::OWNED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    fn acquire_exclusive_slow(&self, sleep: bool) {
        let mut wait = SpinWait::new(self.spin_count);
        loop {
            let v = self.state.load(Ordering::Relaxed);
            if !state::is_owned(v) {
                if self
                    .state
                    .compare_exchange_weak(v, v | state::OWNED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            if wait.spin() {
                continue;
            }

            log::trace!("acquire_exclusive: spin budget exhausted, enqueueing");
            let wb = WaitBlock::new(Class::Exclusive);
            {
                let guard = self.queue.lock();
                let v2 = self.state.load(Ordering::Relaxed);
                match self
                    .state
                    .compare_exchange(v2, v2 | state::WAITERS, Ordering::Relaxed, Ordering::Relaxed)
                {
                    Ok(_) => unsafe { self.queue.insert_last_exclusive(&guard, &wb) },
                    Err(_) => {
                        // The lock state changed out from under us (most
                        // likely: it was released). Restart without
                        // skipping the spin phase.
                        wait.reset();
                        continue;
                    }
                }
            }
            park::block(&wb, self.spin_count, sleep);
            wait.reset();
        }
    }

    pub(crate) fn release_exclusive(&self) {
        self.owners.clear_exclusive();
        let mut v = self.state.load(Ordering::Relaxed);
        loop {
            debug_assert!(state::is_exclusively_held(v));
            match self.state.compare_exchange_weak(
                v,
                v & !state::OWNED,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => v = x,
            }
        }
        if state::has_waiters(v) {
            self.wake();
        }
    }

    // ---- shared acquire -------------------------------------------------

    pub fn acquire_shared(&self) -> ShareGuard<'_> {
        if !self.fast_try_shared() {
            self.acquire_shared_slow(true);
        }
        self.owners.record_shared();
        ShareGuard::new(self)
    }

    pub fn spin_acquire_shared(&self) -> ShareGuard<'_> {
        if !self.fast_try_shared() {
            self.acquire_shared_slow(false);
        }
        self.owners.record_shared();
        ShareGuard::new(self)
    }

    pub fn try_acquire_shared(&self) -> Option<ShareGuard<'_>> {
        if self.fast_try_shared() {
            self.owners.record_shared();
            Some(ShareGuard::new(self))
        } else {
            None
        }
    }

    /// Single-attempt CAS fast path. A fresh shared acquire may not join an
    /// already-shared lock once `Waiters == 1`: it must enqueue and take
    /// its place behind anything already waiting, which is what gives
    /// queued exclusive waiters precedence over a steady stream of new
    /// readers.
    fn fast_try_shared(&self) -> bool {
        let v = self.state.load(Ordering::Relaxed);
        if !state::is_owned(v) {
            self.state
                .compare_exchange(
                    v,
                    v | state::OWNED | state::SHARED_UNIT,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
        } else if !state::has_waiters(v) && state::shared_count(v) >= 1 {
            self.state
                .compare_exchange(v, v + state::SHARED_UNIT, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        } else {
            false
        }
    }

    fn acquire_shared_slow(&self, sleep: bool) {
        let mut wait = SpinWait::new(self.spin_count);
        loop {
            let v = self.state.load(Ordering::Relaxed);
            if !state::is_owned(v) {
                if self
                    .state
                    .compare_exchange_weak(
                        v,
                        v | state::OWNED | state::SHARED_UNIT,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    return;
                }
                continue;
            }
            if !state::has_waiters(v) && state::shared_count(v) >= 1 {
                if self
                    .state
                    .compare_exchange_weak(v, v + state::SHARED_UNIT, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            if wait.spin() {
                continue;
            }

            log::trace!("acquire_shared: spin budget exhausted, enqueueing");
            let wb = WaitBlock::new(Class::Shared);
            {
                let guard = self.queue.lock();
                let v2 = self.state.load(Ordering::Relaxed);
                match self
                    .state
                    .compare_exchange(v2, v2 | state::WAITERS, Ordering::Relaxed, Ordering::Relaxed)
                {
                    Ok(_) => unsafe { self.queue.insert_last(&guard, &wb) },
                    Err(_) => {
                        wait.reset();
                        continue;
                    }
                }
            }
            park::block(&wb, self.spin_count, sleep);
            wait.reset();
        }
    }

    pub(crate) fn release_shared(&self) {
        self.owners.clear_shared();
        let mut v = self.state.load(Ordering::Relaxed);
        loop {
            let count = state::shared_count(v);
            debug_assert!(count >= 1);
            let new_v = if count > 1 {
                v - state::SHARED_UNIT
            } else {
                v - state::OWNED - state::SHARED_UNIT
            };
            match self.state.compare_exchange_weak(v, new_v, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => break,
                Err(x) => v = x,
            }
        }
        if state::has_waiters(v) {
            self.wake();
        }
    }

    // ---- conversion -------------------------------------------------------

    /// Exclusive-to-shared downgrade: always succeeds immediately, the
    /// caller already holds the lock exclusively.
    pub(crate) fn downgrade(&self) {
        let mut v = self.state.load(Ordering::Relaxed);
        loop {
            debug_assert!(state::is_exclusively_held(v));
            match self.state.compare_exchange_weak(
                v,
                v + state::SHARED_UNIT,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => v = x,
            }
        }
        self.owners.clear_exclusive();
        self.owners.record_shared();
        if state::has_waiters(v) {
            self.wake_shared();
        }
    }

    /// Shared-to-exclusive upgrade. The slow path jumps the entire queue
    /// (`insert_first`): a conversion is treated as having already been
    /// waiting since the original shared acquire, not as a fresh arrival.
    pub(crate) fn upgrade(&self, sleep: bool) {
        {
            let v = self.state.load(Ordering::Relaxed);
            if state::shared_count(v) == 1
                && self
                    .state
                    .compare_exchange(v, v - state::SHARED_UNIT, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                self.owners.clear_shared();
                self.owners.record_exclusive();
                return;
            }
        }

        // Other readers remain: give up our own shared stake (we no longer
        // count as a reader while we wait) without touching Owned, which
        // the other readers still hold.
        let mut wait = SpinWait::new(self.spin_count);
        loop {
            let v = self.state.load(Ordering::Relaxed);
            if state::shared_count(v) == 1 {
                if self
                    .state
                    .compare_exchange_weak(v, v - state::SHARED_UNIT, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    self.owners.clear_shared();
                    self.owners.record_exclusive();
                    return;
                }
                continue;
            }
            if self
                .state
                .compare_exchange_weak(v, v - state::SHARED_UNIT, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        self.owners.clear_shared();

        // We now hold no stake at all; wait for full exclusive access at
        // the head of the queue, exactly like `acquire_exclusive` except
        // for where the wait block lands.
        loop {
            let v = self.state.load(Ordering::Relaxed);
            if !state::is_owned(v) {
                if self
                    .state
                    .compare_exchange_weak(v, v | state::OWNED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    self.owners.record_exclusive();
                    return;
                }
                continue;
            }

            if wait.spin() {
                continue;
            }

            let wb = WaitBlock::new(Class::Exclusive);
            {
                let guard = self.queue.lock();
                let v2 = self.state.load(Ordering::Relaxed);
                match self
                    .state
                    .compare_exchange(v2, v2 | state::WAITERS, Ordering::Relaxed, Ordering::Relaxed)
                {
                    Ok(_) => unsafe { self.queue.insert_first(&guard, &wb) },
                    Err(_) => {
                        wait.reset();
                        continue;
                    }
                }
            }
            park::block(&wb, self.spin_count, sleep);
            wait.reset();
        }
    }

    // ---- wake routines (spec.md §4.3) ------------------------------------

    /// Generic wake: used by every release. Wakes the head of the queue —
    /// the whole run of shared waiters if the head is shared, or exactly
    /// the one exclusive waiter if the head is exclusive. Clears `Waiters`
    /// only if the queue was already empty before any dequeue, per the
    /// invariant that a non-empty dequeue always leaves `Waiters` set.
    fn wake(&self) {
        let guard = self.queue.lock();
        if self.queue.is_empty(&guard) {
            drop(guard);
            self.clear_waiters();
            return;
        }

        match self.queue.head_class(&guard) {
            Some(Class::Exclusive) => {
                // SAFETY: `pop_exclusive_head` only returns a queued head.
                let head = unsafe { self.queue.pop_exclusive_head(&guard) }
                    .expect("head_class reported Exclusive but pop found none");
                drop(guard);
                log::debug!("wake: waking one exclusive waiter");
                // SAFETY: `head` was just dequeued and is unparked promptly.
                unsafe { park::unblock(head.as_ref()) };
            }
            Some(Class::Shared) | None => {
                // SAFETY: see above.
                let run = unsafe { self.queue.pop_shared_run(&guard, false) };
                drop(guard);
                log::debug!("wake: waking {} shared waiter(s)", run.len());
                for node in run {
                    unsafe { park::unblock(node.as_ref()) };
                }
            }
        }
    }

    /// Conversion-specific wake: used only by `downgrade`. Wakes every
    /// shared waiter starting at the `FirstShared` cursor, leaving any
    /// exclusive waiters ahead of it untouched.
    fn wake_shared(&self) {
        let guard = self.queue.lock();
        // SAFETY: dequeued waiters are unparked promptly below.
        let run = unsafe { self.queue.pop_shared_run(&guard, true) };
        let now_empty = self.queue.is_empty(&guard);
        drop(guard);
        if now_empty {
            self.clear_waiters();
        }
        for node in run {
            unsafe { park::unblock(node.as_ref()) };
        }
    }

    /// A point-in-time snapshot of the packed state word plus the queue's
    /// emptiness, for the randomized interleaving harness in
    /// `tests/model.rs` to assert invariants against. Not meaningful under
    /// contention — the two reads are not atomic with respect to each
    /// other — so it is only used while the model test holds every
    /// thread's lock operations serialized.
    #[cfg(debug_assertions)]
    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let v = self.state.load(Ordering::SeqCst);
        let guard = self.queue.lock();
        let queue_empty = self.queue.is_empty(&guard);
        let head_class = self.queue.head_class(&guard);
        drop(guard);
        DebugSnapshot {
            owned: state::is_owned(v),
            waiters_bit: state::has_waiters(v),
            shared_count: state::shared_count(v),
            queue_empty,
            head_class,
        }
    }

    fn clear_waiters(&self) {
        let mut v = self.state.load(Ordering::Relaxed);
        loop {
            match self.state.compare_exchange_weak(
                v,
                v & !state::WAITERS,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(x) => v = x,
            }
        }
    }
}

#[cfg(debug_assertions)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugSnapshot {
    pub owned: bool,
    pub waiters_bit: bool,
    pub shared_count: usize,
    pub queue_empty: bool,
    pub head_class: Option<Class>,
}

impl Default for FairRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FairRwLock {
    fn drop(&mut self) {
        self.owners.assert_idle();
        #[cfg(any(debug_assertions, feature = "debug-owners"))]
        {
            let guard = self.queue.lock();
            assert!(
                self.queue.is_empty(&guard),
                "FairRwLock dropped while a waiter was still enqueued"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn uncontended_round_trip() {
        let lock = FairRwLock::new();
        let g = lock.acquire_exclusive();
        drop(g);
        assert!(!lock.owned());
        let g = lock.acquire_shared();
        assert_eq!(lock.shared_owners(), 1);
        drop(g);
        assert!(!lock.owned());
    }

    #[test]
    fn three_shared_readers_concurrently() {
        let lock = FairRwLock::new();
        let g1 = lock.acquire_shared();
        let g2 = lock.acquire_shared();
        let g3 = lock.acquire_shared();
        assert_eq!(lock.shared_owners(), 3);
        drop(g1);
        drop(g2);
        drop(g3);
        assert!(!lock.owned());
    }

    #[test]
    fn writer_blocks_until_reader_releases() {
        let lock = Arc::new(FairRwLock::new());
        let reader = lock.acquire_shared();
        let lock2 = Arc::clone(&lock);
        let t = thread::spawn(move || {
            let _g = lock2.acquire_exclusive();
        });
        thread::sleep(Duration::from_millis(30));
        assert_eq!(lock.shared_owners(), 1);
        drop(reader);
        t.join().unwrap();
        assert!(!lock.owned());
    }

    #[test]
    fn fifo_among_exclusive_waiters() {
        let lock = Arc::new(FairRwLock::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = lock.acquire_exclusive();

        let mut threads = Vec::new();
        for i in 0..3 {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            threads.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(10 * (i + 1) as u64));
                let _g = lock.acquire_exclusive();
                order.lock().unwrap().push(i);
            }));
        }
        thread::sleep(Duration::from_millis(80));
        drop(first);
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn try_acquire_exclusive_fails_while_shared_held() {
        let lock = FairRwLock::new();
        let _reader = lock.acquire_shared();
        assert!(lock.try_acquire_exclusive().is_none());
    }

    #[test]
    fn downgrade_keeps_ownership() {
        let lock = FairRwLock::new();
        let g = lock.acquire_exclusive();
        let shared = g.downgrade();
        assert_eq!(lock.shared_owners(), 1);
        drop(shared);
        assert!(!lock.owned());
    }

    #[test]
    fn upgrade_sole_reader_is_immediate() {
        let lock = FairRwLock::new();
        let g = lock.acquire_shared();
        let exclusive = g.upgrade();
        assert!(lock.owned());
        assert_eq!(lock.shared_owners(), 0);
        drop(exclusive);
    }
}
