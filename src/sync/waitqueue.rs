//! FIFO wait queue of blocked tasks. Ground: `SPEC_FULL.md` §4.3,
//! `original_source/kernel/sync/waitqueue.c`.

use super::spinlock::Spinlock;
use crate::sched::task::TaskId;
use alloc::collections::VecDeque;

/// A FIFO queue of tasks blocked on some condition.
pub struct WaitQueue {
    waiters: Spinlock<VecDeque<TaskId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Spinlock::new(VecDeque::new()),
        }
    }

    /// Enqueues the current task and blocks it. The caller is responsible
    /// for having already released any lock protecting the condition being
    /// waited on, and for invoking `crate::sched::reschedule` after this
    /// returns to actually yield the CPU.
    pub fn wait(&self) {
        self.wait_on(None);
    }

    /// Like `wait`, additionally recording the task (e.g. a mutex owner)
    /// this one is waiting on, for priority-inheritance bookkeeping.
    pub fn wait_on(&self, waiting_on: Option<TaskId>) {
        let Some(id) = crate::sched::block_current(waiting_on) else {
            return;
        };
        self.waiters.lock().push_back(id);
    }

    /// Wakes the longest-waiting task, if any. Returns its id.
    pub fn wake_one(&self) -> Option<TaskId> {
        let id = self.waiters.lock().pop_front()?;
        crate::sched::wake(id);
        Some(id)
    }

    /// Wakes every waiting task, in enqueue order.
    pub fn wake_all(&self) {
        let mut waiters = self.waiters.lock();
        while let Some(id) = waiters.pop_front() {
            crate::sched::wake(id);
        }
    }

    /// Whether any task is currently queued.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn wake_all_drains_in_fifo_order() {
        let q = WaitQueue::new();
        q.waiters.lock().push_back(3);
        q.waiters.lock().push_back(7);
        q.wake_all();
        assert!(q.is_empty());
    }
}
