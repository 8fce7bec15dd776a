//! Writer-preferring read-write lock. Ground: `SPEC_FULL.md` §4.3,
//! `original_source/kernel/sync/rwlock.c`.
//!
//! While a writer waits, new readers block so a steady stream of readers
//! cannot starve writers out indefinitely.

use super::spinlock::Spinlock;
use super::waitqueue::WaitQueue;
use core::cell::UnsafeCell;

struct State {
    readers: u32,
    writer: bool,
    writer_waiting: bool,
}

pub struct RwLock<T> {
    state: Spinlock<State>,
    readers_wq: WaitQueue,
    writers_wq: WaitQueue,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for RwLock<T> {}

pub struct ReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

pub struct WriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> RwLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: Spinlock::new(State { readers: 0, writer: false, writer_waiting: false }),
            readers_wq: WaitQueue::new(),
            writers_wq: WaitQueue::new(),
            value: UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        loop {
            {
                let mut state = self.state.lock();
                if !state.writer && !state.writer_waiting {
                    state.readers += 1;
                    return ReadGuard { lock: self };
                }
            }
            self.readers_wq.wait();
            // SAFETY: reschedule only touches scheduler-internal state.
            unsafe { crate::sched::reschedule() };
        }
    }

    pub fn write(&self) -> WriteGuard<'_, T> {
        loop {
            {
                let mut state = self.state.lock();
                if !state.writer && state.readers == 0 {
                    state.writer = true;
                    state.writer_waiting = false;
                    return WriteGuard { lock: self };
                }
                state.writer_waiting = true;
            }
            self.writers_wq.wait();
            // SAFETY: reschedule only touches scheduler-internal state.
            unsafe { crate::sched::reschedule() };
        }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        let readers_left = {
            let mut state = self.lock.state.lock();
            state.readers -= 1;
            state.readers
        };
        if readers_left == 0 {
            self.lock.writers_wq.wake_one();
        }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        {
            let mut state = self.lock.state.lock();
            state.writer = false;
        }
        if !self.lock.readers_wq.is_empty() {
            self.lock.readers_wq.wake_all();
        } else {
            self.lock.writers_wq.wake_one();
        }
    }
}

impl<T> core::ops::Deref for ReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: a live ReadGuard guarantees no concurrent writer.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> core::ops::Deref for WriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: a live WriteGuard guarantees exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> core::ops::DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: a live WriteGuard guarantees exclusive access.
        unsafe { &mut *self.lock.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn multiple_readers_coexist() {
        let lock = RwLock::new(42);
        let a = lock.read();
        let b = lock.read();
        assert_eq!(*a, 42);
        assert_eq!(*b, 42);
    }

    #[test_case]
    fn writer_sees_exclusive_access() {
        let lock = RwLock::new(0);
        {
            let mut w = lock.write();
            *w = 7;
        }
        assert_eq!(*lock.read(), 7);
    }
}
