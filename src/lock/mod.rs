//! Locking primitives, layered per the crate's lock-order invariant:
//! log lock > inode-table lock > buffer-bucket locks (ascending bucket
//! index) > per-inode sleep-lock > per-buffer sleep-lock. Debug builds
//! check this ordering at runtime via [`order`].

mod order;
mod sleepablelock;
mod sleeplock;
mod spinlock;

pub use order::LockLevel;
pub use sleepablelock::{SleepableLock, SleepableLockGuard};
pub use sleeplock::{SleepLock, SleepLockGuard};
pub use spinlock::{Spinlock, SpinlockGuard};
