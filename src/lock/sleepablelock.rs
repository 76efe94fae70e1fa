//! A lock whose holder can put itself to sleep and be woken by another
//! thread while still "holding" the lock conceptually — used by the log
//! manager's `begin_op`/`end_op` wait loop (a transaction blocks until the
//! log has room, and is woken once an `end_op` frees some up).

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};

pub struct SleepableLock<T> {
    name: &'static str,
    locked: Mutex<bool>,
    cv: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SleepableLock<T> {}
unsafe impl<T: Send> Sync for SleepableLock<T> {}

pub struct SleepableLockGuard<'a, T> {
    lock: &'a SleepableLock<T>,
    state: Option<MutexGuard<'a, bool>>,
}

impl<T> SleepableLock<T> {
    pub fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            locked: Mutex::new(false),
            cv: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> SleepableLockGuard<'_, T> {
        let mut state = self.locked.lock().expect("SleepableLock poisoned");
        while *state {
            state = self.cv.wait(state).expect("SleepableLock poisoned");
        }
        *state = true;
        SleepableLockGuard {
            lock: self,
            state: Some(state),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Raw access to the guarded data, bypassing the lock entirely.
    ///
    /// # Safety
    /// The caller must otherwise guarantee exclusive access to the data
    /// for as long as the returned pointer is used. The log uses this to
    /// commit with the lock released (so it isn't held across disk I/O),
    /// relying on its `committing` flag — set before release, cleared only
    /// after the pointer goes out of use — to keep out every other path.
    pub unsafe fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }
}

impl<'a, T> SleepableLockGuard<'a, T> {
    /// Atomically releases the lock and blocks until woken by `wakeup`.
    /// Reacquires the lock before returning, exactly like a condition
    /// variable wait.
    pub fn sleep(&mut self) {
        let state = self.state.take().expect("sleep: guard missing");
        self.state = Some(self.lock.cv.wait(state).expect("SleepableLock poisoned"));
    }

    /// Runs `f` with the lock released, then reacquires it. Used to commit
    /// a transaction without holding the log lock across disk I/O.
    pub fn reacquire_after<F: FnOnce()>(&mut self, f: F) {
        let mut state = self.state.take().expect("reacquire_after: guard missing");
        *state = false;
        drop(state);
        self.lock.cv.notify_all();

        f();

        let mut state = self.lock.locked.lock().expect("SleepableLock poisoned");
        while *state {
            state = self.lock.cv.wait(state).expect("SleepableLock poisoned");
        }
        *state = true;
        self.state = Some(state);
    }

    /// Wakes every thread sleeping on this lock.
    pub fn wakeup(&self) {
        self.lock.cv.notify_all();
    }
}

impl<T> Deref for SleepableLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: `state` is `Some` (locked) for the guard's entire
        // lifetime except during `sleep`/`reacquire_after`, which never
        // touch the data themselves.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepableLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SleepableLockGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(mut state) = self.state.take() {
            *state = false;
            drop(state);
            self.lock.cv.notify_all();
        }
    }
}
