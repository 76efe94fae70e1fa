//! A lock that blocks the calling thread instead of busy-waiting.
//!
//! Used for per-buffer and per-inode locks: both are held across disk I/O,
//! which can take a while, so spinning would waste the CPU the way it
//! would not for the short critical sections the spin-lock is for.
//! Mirrors the teacher's pid-tagged sleep-lock, but tags the holder with a
//! `std::thread::ThreadId` since this crate runs on real OS threads rather
//! than a scheduler of its own processes.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use super::order::{self, LockLevel};

struct State {
    locked: bool,
    holder: Option<ThreadId>,
}

pub struct SleepLock<T> {
    name: &'static str,
    level: LockLevel,
    state: Mutex<State>,
    cv: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SleepLock<T> {}
unsafe impl<T: Send> Sync for SleepLock<T> {}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

impl<T> SleepLock<T> {
    pub fn new(name: &'static str, level: LockLevel, data: T) -> Self {
        Self {
            name,
            level,
            state: Mutex::new(State {
                locked: false,
                holder: None,
            }),
            cv: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        order::acquiring(self.level);
        let mut state = self.state.lock().expect("SleepLock poisoned");
        while state.locked {
            state = self.cv.wait(state).expect("SleepLock poisoned");
        }
        state.locked = true;
        state.holder = Some(thread::current().id());
        SleepLockGuard { lock: self }
    }

    /// Whether the calling thread currently holds this lock.
    pub fn holding(&self) -> bool {
        let state = self.state.lock().expect("SleepLock poisoned");
        state.locked && state.holder == Some(thread::current().id())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: holding the guard means `state.locked` was exclusively set by us.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: holding the guard means `state.locked` was exclusively set by us.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().expect("SleepLock poisoned");
        state.locked = false;
        state.holder = None;
        drop(state);
        self.lock.cv.notify_one();
        order::released(self.lock.level);
    }
}
