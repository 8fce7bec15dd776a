//! Blocking mutex with single-level priority inheritance. Ground:
//! `SPEC_FULL.md` §4.3, `original_source/kernel/sync/mutex.c`.
//!
//! The inheritance is intentionally shallow: only the direct owner is
//! boosted to match a blocked waiter's priority, never the owner's own
//! transitive blockers. A chain of three or more tasks waiting on nested
//! mutexes can still suffer priority inversion past the first link; the
//! original kernel carries the same limitation and this keeps that
//! behavior rather than quietly fixing it.

use super::spinlock::Spinlock;
use super::waitqueue::WaitQueue;
use crate::sched::task::TaskId;
use core::cell::UnsafeCell;

struct State {
    owner: Option<TaskId>,
    boosted_from: Option<u8>,
}

/// A mutual-exclusion lock that blocks (rather than spins) and that
/// inherits priority from a higher-priority waiter to its current owner.
pub struct Mutex<T> {
    state: Spinlock<State>,
    waiters: WaitQueue,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Mutex<T> {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: Spinlock::new(State { owner: None, boosted_from: None }),
            waiters: WaitQueue::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, blocking the current task if it is held.
    /// Boosts the current owner's priority to the caller's if the caller
    /// is more urgent (lower numeric priority).
    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            let owner = {
                let mut state = self.state.lock();
                if state.owner.is_none() {
                    state.owner = crate::sched::current_id();
                    return MutexGuard { mutex: self };
                }
                let owner = state.owner.expect("checked above");
                if let Some(me) = crate::sched::current_id() {
                    let my_priority = crate::sched::priority_of(me);
                    let prior_owner_priority = crate::sched::boost_priority(owner, my_priority);
                    if state.boosted_from.is_none() && prior_owner_priority != my_priority {
                        state.boosted_from = Some(prior_owner_priority);
                    }
                }
                owner
            };
            self.waiters.wait_on(Some(owner));
            // SAFETY: reschedule only touches scheduler-internal state.
            unsafe { crate::sched::reschedule() };
        }
    }

    /// Releases the lock, restoring any priority boost it was holding for
    /// this mutex, then wakes one waiter.
    pub fn unlock(&self, guard: MutexGuard<'_, T>) {
        core::mem::forget(guard);
        let (owner, boosted_from) = {
            let mut state = self.state.lock();
            let owner = state.owner.take();
            let boosted = state.boosted_from.take();
            (owner, boosted)
        };
        if let (Some(owner), Some(_)) = (owner, boosted_from) {
            crate::sched::restore_priority(owner);
        }
        self.waiters.wake_one();
    }
}

impl<T> core::ops::Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means this task is the recorded owner.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> core::ops::DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard means this task is the recorded owner.
        unsafe { &mut *self.mutex.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn uncontended_lock_succeeds_immediately() {
        let m = Mutex::new(5);
        let guard = m.lock();
        assert_eq!(*guard, 5);
        m.unlock(guard);
    }

    #[test_case]
    fn value_mutates_through_guard() {
        let m = Mutex::new(0);
        {
            let mut guard = m.lock();
            *guard += 1;
            m.unlock(guard);
        }
        let guard = m.lock();
        assert_eq!(*guard, 1);
        m.unlock(guard);
    }
}
