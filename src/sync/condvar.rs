//! Condition variable bound to a caller-supplied mutex at each call.
//! Ground: `SPEC_FULL.md` §4.3, `original_source/kernel/sync/condvar.c`.
//!
//! Callers must guard against spurious wakeups with the usual
//! `while !predicate { condvar.wait(&mutex, guard) }` idiom; this
//! implementation does not guarantee a wake corresponds to the predicate
//! actually having become true.

use super::mutex::{Mutex, MutexGuard};
use super::waitqueue::WaitQueue;

pub struct Condvar {
    waiters: WaitQueue,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: WaitQueue::new(),
        }
    }

    /// Atomically enqueues the current task and releases `mutex`, blocks,
    /// then reacquires `mutex` before returning.
    pub fn wait<'a, T>(&self, mutex: &'a Mutex<T>, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.waiters.wait();
        mutex.unlock(guard);
        // SAFETY: reschedule only touches scheduler-internal state.
        unsafe { crate::sched::reschedule() };
        mutex.lock()
    }

    /// Wakes one waiting task.
    pub fn signal(&self) {
        self.waiters.wake_one();
    }

    /// Wakes every waiting task.
    pub fn broadcast(&self) {
        self.waiters.wake_all();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn broadcast_on_empty_queue_is_a_no_op() {
        let cv = Condvar::new();
        cv.broadcast();
        cv.signal();
    }
}
