//! The Block/Unblock rendezvous (`spec.md` §4.4): the protocol that
//! guarantees at most one OS-level park call and at most one matching
//! unpark call per wait block, no matter which side — the parking waiter
//! or the releasing waker — reaches the rendezvous first.
//!
//! The "keyed event" `spec.md` §3.4/§6 asks the environment for is modeled
//! directly by `std::thread::park`/`Thread::unpark`: every OS thread
//! already carries exactly the single-permit, address-stable wake token
//! the design wants, keyed implicitly by thread identity rather than by an
//! address we'd otherwise have to lazily allocate and install with a CAS.
//! See DESIGN.md for why this collapses the lazily-installed global event
//! object from the original design.
//!
//! ## The rendezvous polarity
//!
//! `spinning` starts `true`. Exactly one of the waiter (in [`block`]) and
//! the waker (in [`unblock`]) will be the *first* to swap it to `false` —
//! that swap observes the pre-image `true`. The second to arrive observes
//! `false`.
//!
//! * If the waiter arrives first (pre-image `true`), it must actually call
//!   `thread::park()`: nobody has released on its behalf yet, and the
//!   eventual waker — seeing the flag already `false` — will call
//!   `unpark()` to match.
//! * If the waker arrives first (pre-image `true` on *its* swap), it must
//!   *not* call `unpark()`: the waiter hasn't blocked yet and, when it
//!   reaches its own swap, will observe the flag already `false` and skip
//!   parking entirely.
//!
//! Simulating both possible arrival orders shows this is the only assignment
//! that yields exactly one park and one matching unpark in every
//! interleaving. `spec.md` §9 flags the source's polarity as possibly a
//! latent bug relative to a naively "expected" opposite reading; that naive
//! reading in fact produces a park call with no pending release (deadlock)
//! in the order where the waker races ahead. This implementation keeps the
//! source's polarity because it is the one that is actually correct, not
//! because it was transcribed unexamined.

use std::sync::atomic::Ordering;

use crate::spin::SpinWait;
use crate::wait_block::WaitBlock;

/// Spins, then (if `sleep`) parks, waiting for `wb`'s spinning flag to be
/// cleared by a waker. Returns once the flag is clear. Never parks if
/// `sleep` is false — the caller is a `spin_*` variant.
pub fn block(wb: &WaitBlock, spin_budget: u32, sleep: bool) {
    let mut wait = SpinWait::new(spin_budget);
    while wb.is_spinning(Ordering::Acquire) {
        if !wait.spin() {
            break;
        }
    }

    if !wb.is_spinning(Ordering::Acquire) {
        return;
    }

    if sleep {
        let arrived_first = wb.take_spinning(Ordering::Acquire);
        if arrived_first {
            // Nobody has released on our behalf yet; the eventual waker
            // will see the flag already cleared and call `unpark`.
            std::thread::park();
        }
        // Otherwise the waker already raced ahead of us and will not call
        // `unpark` — there is nothing to wait for.
    } else {
        loop {
            if !wb.is_spinning(Ordering::Acquire) {
                return;
            }
            wait.spin_only();
        }
    }
}

/// Wakes the waiter owning `wb`. Safe to call even if the waiter has not
/// yet reached [`block`]'s park call — the rendezvous guarantees the
/// `unpark` is only sent when it is actually needed.
pub fn unblock(wb: &WaitBlock) {
    let arrived_first = wb.take_spinning(Ordering::Release);
    if !arrived_first {
        // The waiter already cleared its own flag — it has committed to
        // (or already has) called `park()`, so we must match it.
        wb.thread.unpark();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait_block::Class;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn unblock_before_block_does_not_deadlock() {
        let wb = Arc::new(WaitBlock::new(Class::Exclusive));
        // Unblock races ahead of the waiter.
        unblock(&wb);
        // The waiter must see the flag already false and return immediately.
        let started = std::time::Instant::now();
        block(&wb, 0, true);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn block_then_unblock_from_other_thread() {
        let wb = Arc::new(WaitBlock::new(Class::Exclusive));
        let wb2 = Arc::clone(&wb);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            unblock(&wb2);
        });
        block(&wb, 0, true);
        t.join().unwrap();
    }
}
