//! Debug-only bookkeeping of owner thread identities (`spec.md` §7: "API
//! misuse ... is undefined behavior, detectable only in debug builds via
//! optional bookkeeping of owner identities").
//!
//! Grounded on `combinators/debug_checked.rs`'s pattern: the real
//! bookkeeping only exists under `debug_assertions` (or the opt-in
//! `debug-owners` feature for release builds that still want the check);
//! otherwise this type is zero-sized and every method is a no-op, so it
//! costs nothing in a release build.

#[cfg(any(debug_assertions, feature = "debug-owners"))]
mod imp {
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    pub struct OwnerTrack {
        exclusive: Mutex<Option<ThreadId>>,
        shared: Mutex<Vec<ThreadId>>,
    }

    impl OwnerTrack {
        pub const fn new() -> Self {
            Self {
                exclusive: Mutex::new(None),
                shared: Mutex::new(Vec::new()),
            }
        }

        pub fn record_exclusive(&self) {
            let mut slot = self.exclusive.lock().unwrap();
            debug_assert!(slot.is_none(), "exclusive lock acquired while already recorded held");
            *slot = Some(thread::current().id());
        }

        pub fn clear_exclusive(&self) {
            let mut slot = self.exclusive.lock().unwrap();
            assert_eq!(
                *slot,
                Some(thread::current().id()),
                "release_exclusive called by a thread that is not the recorded exclusive owner"
            );
            *slot = None;
        }

        pub fn record_shared(&self) {
            self.shared.lock().unwrap().push(thread::current().id());
        }

        pub fn clear_shared(&self) {
            let mut owners = self.shared.lock().unwrap();
            let id = thread::current().id();
            match owners.iter().position(|&owner| owner == id) {
                Some(index) => {
                    owners.remove(index);
                }
                None => panic!("release_shared called by a thread with no recorded shared lock"),
            }
        }

        pub fn assert_idle(&self) {
            assert!(
                self.exclusive.lock().unwrap().is_none(),
                "FairRwLock dropped while still held exclusively"
            );
            assert!(
                self.shared.lock().unwrap().is_empty(),
                "FairRwLock dropped while shared owners remained"
            );
        }
    }
}

#[cfg(not(any(debug_assertions, feature = "debug-owners")))]
mod imp {
    pub struct OwnerTrack;

    impl OwnerTrack {
        pub const fn new() -> Self {
            Self
        }
        pub fn record_exclusive(&self) {}
        pub fn clear_exclusive(&self) {}
        pub fn record_shared(&self) {}
        pub fn clear_shared(&self) {}
        pub fn assert_idle(&self) {}
    }
}

pub use imp::OwnerTrack;
