//! Debug-only lock-order checking.
//!
//! The crate's five lock layers (log > inode-table > buffer buckets,
//! ascending > per-inode sleep-lock > per-buffer sleep-lock) must always
//! be acquired in non-decreasing order on a single thread, or a deadlock
//! is possible with a thread going the other way. In debug builds, every
//! acquisition records its level on a thread-local stack and panics if a
//! lower level is taken while a higher one is already held; release pops
//! it. Release builds compile this away.

use std::cell::RefCell;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LockLevel {
    Log = 0,
    InodeTable = 1,
    BufBucket = 2,
    InodeSleep = 3,
    BufSleep = 4,
}

thread_local! {
    static HELD: RefCell<Vec<LockLevel>> = RefCell::new(Vec::new());
}

/// Records that `level` is about to be acquired on this thread. Panics (in
/// debug builds only) if a strictly higher level is already held, since
/// that would violate the crate-wide lock order.
#[inline]
pub fn acquiring(level: LockLevel) {
    if cfg!(debug_assertions) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(&top) = held.last() {
                assert!(
                    top <= level,
                    "lock order violation: acquiring {:?} while holding {:?}",
                    level,
                    top
                );
            }
            held.push(level);
        });
    }
}

/// Records that `level` has been released on this thread.
#[inline]
pub fn released(level: LockLevel) {
    if cfg!(debug_assertions) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            let popped = held.pop();
            debug_assert_eq!(popped, Some(level), "lock released out of order");
        });
    }
}
