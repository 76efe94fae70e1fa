//! Busy-wait mutual exclusion.
//!
//! Used for short, non-blocking critical sections: buffer-bucket locks, the
//! inode-table lock, and the log's own state. Never hold one across a
//! sleep-lock acquisition or a disk I/O — that is the lock-ordering
//! invariant the layers above this module are built around.

use std::ops::{Deref, DerefMut};

use super::order::{self, LockLevel};

pub struct Spinlock<T> {
    name: &'static str,
    level: LockLevel,
    inner: spin::Mutex<T>,
}

pub struct SpinlockGuard<'a, T> {
    name: &'static str,
    level: LockLevel,
    guard: spin::MutexGuard<'a, T>,
}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, level: LockLevel, data: T) -> Self {
        Self {
            name,
            level,
            inner: spin::Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        order::acquiring(self.level);
        SpinlockGuard {
            name: self.name,
            level: self.level,
            guard: self.inner.lock(),
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<T> SpinlockGuard<'_, T> {
    pub fn holding(&self) -> &'static str {
        self.name
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        order::released(self.level);
    }
}
