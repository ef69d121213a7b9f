//! The adaptive spin budget (`spec.md` §4.5), grounded on `spin_wait.rs`'s
//! relax-then-yield loop: an initial CPU-bound spin-loop-hint phase, falling back
//! to yielding the OS scheduler, until the budget is exhausted.
//!
//! The same budget is reused before enqueue, inside the park/unpark
//! rendezvous, and as the yield cadence of the `spin_*` lock variants that
//! never park.

use std::sync::OnceLock;

#[inline]
fn cpu_relax(iterations: u32) {
    for _ in 0..iterations {
        std::hint::spin_loop();
    }
}

static RECOMMENDED_SPIN_COUNT: OnceLock<u32> = OnceLock::new();

/// `SpinCount` is zero on single-processor hosts (nothing to spin for) and
/// a fixed positive budget otherwise.
pub fn recommended_spin_count() -> u32 {
    *RECOMMENDED_SPIN_COUNT.get_or_init(|| {
        match std::thread::available_parallelism() {
            Ok(n) if n.get() > 1 => 40,
            _ => 0,
        }
    })
}

pub struct SpinWait {
    counter: u32,
    budget: u32,
}

impl SpinWait {
    pub fn new(budget: u32) -> Self {
        Self { counter: 0, budget }
    }

    /// Spins once. Returns whether the budget has more spins left — once
    /// this returns `false`, the caller should stop spinning and either
    /// enqueue or park.
    #[inline]
    pub fn spin(&mut self) -> bool {
        if self.counter >= self.budget {
            return false;
        }
        self.counter += 1;

        if self.counter > self.budget / 2 && self.budget > 3 {
            std::thread::yield_now();
        } else {
            cpu_relax(1 << self.counter.min(10));
        }

        self.counter < self.budget
    }

    /// Spin-only variant for the `spin_*` lock entry points: never yields
    /// to the scheduler indefinitely, just relaxes the CPU and lets the
    /// caller re-check its condition in a tight loop.
    #[inline]
    pub fn spin_only(&mut self) {
        self.counter = self.counter.saturating_add(1);
        cpu_relax(1 << self.counter.min(10));
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_never_spins() {
        let mut w = SpinWait::new(0);
        assert!(!w.spin());
    }

    #[test]
    fn budget_is_exhausted_eventually() {
        let mut w = SpinWait::new(5);
        let mut spun = 0;
        while w.spin() {
            spun += 1;
            assert!(spun <= 5);
        }
    }
}
