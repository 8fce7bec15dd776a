//! Counting semaphore with FIFO waiters. Ground: `SPEC_FULL.md` §4.3,
//! `original_source/kernel/sync/semaphore.c`.

use super::spinlock::Spinlock;
use super::waitqueue::WaitQueue;

pub struct Semaphore {
    count: Spinlock<i32>,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(initial: i32) -> Self {
        Self {
            count: Spinlock::new(initial),
            waiters: WaitQueue::new(),
        }
    }

    /// Decrements the count, blocking until it is positive.
    pub fn wait(&self) {
        loop {
            {
                let mut count = self.count.lock();
                if *count > 0 {
                    *count -= 1;
                    return;
                }
            }
            self.waiters.wait();
            // SAFETY: reschedule only touches scheduler-internal state.
            unsafe { crate::sched::reschedule() };
        }
    }

    /// Decrements the count without blocking; returns whether it
    /// succeeded.
    pub fn trywait(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Increments the count and wakes one waiter if any were queued.
    pub fn signal(&self) {
        *self.count.lock() += 1;
        self.waiters.wake_one();
    }

    pub fn count(&self) -> i32 {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn trywait_never_blocks_and_respects_count() {
        let s = Semaphore::new(1);
        assert!(s.trywait());
        assert!(!s.trywait());
        s.signal();
        assert!(s.trywait());
    }

    #[test_case]
    fn signal_increments_count() {
        let s = Semaphore::new(0);
        assert_eq!(s.count(), 0);
        s.signal();
        assert_eq!(s.count(), 1);
    }
}
